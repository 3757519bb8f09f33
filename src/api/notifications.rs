//! Flash notifications

use axum::{extract::State, Json};

use crate::{services::notifications::Outcome, AppState};

use super::AuthenticatedUser;

/// Messages waiting for the caller. Each message is returned once.
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "notifications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pending messages, oldest first", body = Vec<Outcome>)
    )
)]
pub async fn drain_notifications(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> Json<Vec<Outcome>> {
    Json(state.services.flash.drain(claims.user_id))
}
