//! Borrow and return endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    models::{IssueFilter, IssueRecord},
    services::lending::{BorrowOutcome, ReturnOutcome},
    AppState,
};

use super::AuthenticatedUser;

/// Borrow request
#[derive(Deserialize, ToSchema)]
pub struct BorrowRequest {
    /// Borrower. Students may only borrow for themselves and can omit it.
    pub user_id: Option<i32>,
    pub book_id: i32,
    /// Join the queue when no copy is free (default true)
    pub reserve_if_unavailable: Option<bool>,
}

/// Borrow a book, or join its queue
#[utoipa::path(
    post,
    path = "/borrows",
    tag = "lending",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Book issued or reservation queued", body = BorrowOutcome),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Already borrowed or queued, or out of stock"),
        (status = 422, description = "Membership inactive or member ID missing"),
        (status = 503, description = "Concurrent update, retry")
    )
)]
pub async fn request_borrow(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<BorrowOutcome>)> {
    let user_id = match request.user_id {
        Some(user_id) => user_id,
        None if claims.role.is_staff() => {
            return Err(AppError::Validation("user_id is required".to_string()))
        }
        None => claims.user_id,
    };
    claims.require_self_or_staff(user_id)?;

    let reserve = request.reserve_if_unavailable.unwrap_or(true);
    let outcome = state
        .services
        .retry_for(user_id, || {
            state
                .services
                .lending
                .request_borrow(user_id, request.book_id, reserve)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Return a borrowed copy
#[utoipa::path(
    post,
    path = "/issues/{id}/return",
    tag = "lending",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Issue ID")
    ),
    responses(
        (status = 200, description = "Copy returned", body = ReturnOutcome),
        (status = 404, description = "Issue not found"),
        (status = 409, description = "Already returned"),
        (status = 503, description = "Concurrent update, retry")
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(issue_id): Path<i32>,
) -> AppResult<Json<ReturnOutcome>> {
    claims.require_staff()?;

    let actor = claims.actor();
    let outcome = state
        .services
        .retry(|| state.services.lending.return_book(actor, issue_id))
        .await?;
    Ok(Json(outcome))
}

/// List issue records
#[utoipa::path(
    get,
    path = "/issues",
    tag = "lending",
    security(("bearer_auth" = [])),
    params(IssueFilter),
    responses(
        (status = 200, description = "Issue records, newest first", body = Vec<IssueRecord>)
    )
)]
pub async fn list_issues(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(filter): Query<IssueFilter>,
) -> AppResult<Json<Vec<IssueRecord>>> {
    claims.require_staff()?;

    let issues = state.services.lending.list_issues(filter).await?;
    Ok(Json(issues))
}

/// Get an issue record
#[utoipa::path(
    get,
    path = "/issues/{id}",
    tag = "lending",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Issue ID")
    ),
    responses(
        (status = 200, description = "Issue record", body = IssueRecord),
        (status = 404, description = "Issue not found")
    )
)]
pub async fn get_issue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(issue_id): Path<i32>,
) -> AppResult<Json<IssueRecord>> {
    let issue = state.services.lending.issue(issue_id).await?;
    claims.require_self_or_staff(issue.user_id)?;
    Ok(Json(issue))
}

/// Issue records of a user
#[utoipa::path(
    get,
    path = "/users/{id}/issues",
    tag = "lending",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "The user's issue records, newest first", body = Vec<IssueRecord>)
    )
)]
pub async fn user_issues(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<IssueRecord>>> {
    claims.require_self_or_staff(user_id)?;

    let issues = state.services.lending.issues_for_user(user_id).await?;
    Ok(Json(issues))
}
