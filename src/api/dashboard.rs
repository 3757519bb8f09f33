//! Role dashboards

use axum::{extract::State, Json};

use crate::{
    error::{AppError, AppResult},
    models::Role,
    services::dashboard::{AdminDashboard, LibrarianDashboard, StudentDashboard},
    AppState,
};

use super::AuthenticatedUser;

#[utoipa::path(
    get,
    path = "/dashboard/admin",
    tag = "dashboard",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Library totals", body = AdminDashboard),
        (status = 403, description = "Administrators only")
    )
)]
pub async fn admin_dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<AdminDashboard>> {
    claims.require_admin()?;

    let dashboard = state.services.dashboard.admin().await?;
    Ok(Json(dashboard))
}

#[utoipa::path(
    get,
    path = "/dashboard/librarian",
    tag = "dashboard",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Desk figures for the day", body = LibrarianDashboard),
        (status = 403, description = "Librarians only")
    )
)]
pub async fn librarian_dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<LibrarianDashboard>> {
    claims.require_staff()?;

    let dashboard = state.services.dashboard.librarian().await?;
    Ok(Json(dashboard))
}

#[utoipa::path(
    get,
    path = "/dashboard/student",
    tag = "dashboard",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The caller's loans, fines and membership", body = StudentDashboard),
        (status = 403, description = "Students only")
    )
)]
pub async fn student_dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<StudentDashboard>> {
    if claims.role != Role::Student {
        return Err(AppError::NotAuthorized("Student dashboard only".to_string()));
    }

    let dashboard = state.services.dashboard.student(claims.user_id).await?;
    Ok(Json(dashboard))
}
