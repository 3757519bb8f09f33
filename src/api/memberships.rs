//! Membership registry endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::{AssignBarcode, Membership, RegisterMembership, UpgradeMembership},
    AppState,
};

use super::AuthenticatedUser;

/// List memberships
#[utoipa::path(
    get,
    path = "/memberships",
    tag = "memberships",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All memberships", body = Vec<Membership>)
    )
)]
pub async fn list_memberships(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Membership>>> {
    claims.require_staff()?;

    let memberships = state.services.memberships.list_memberships().await?;
    Ok(Json(memberships))
}

/// Membership of a user
#[utoipa::path(
    get,
    path = "/users/{id}/membership",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Membership", body = Membership),
        (status = 404, description = "No membership")
    )
)]
pub async fn get_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Membership>> {
    claims.require_self_or_staff(user_id)?;

    let membership = state.services.memberships.membership(user_id).await?;
    Ok(Json(membership))
}

/// Register a membership
#[utoipa::path(
    post,
    path = "/users/{id}/membership",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    request_body = RegisterMembership,
    responses(
        (status = 201, description = "Membership registered", body = Membership),
        (status = 409, description = "Already a member or barcode taken")
    )
)]
pub async fn register_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Json(request): Json<RegisterMembership>,
) -> AppResult<(StatusCode, Json<Membership>)> {
    claims.require_staff()?;

    let membership = state
        .services
        .retry(|| state.services.memberships.register(user_id, request.clone()))
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

/// Change the membership type
#[utoipa::path(
    put,
    path = "/users/{id}/membership/type",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    request_body = UpgradeMembership,
    responses(
        (status = 200, description = "Membership changed", body = Membership),
        (status = 404, description = "No membership")
    )
)]
pub async fn upgrade_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Json(request): Json<UpgradeMembership>,
) -> AppResult<Json<Membership>> {
    claims.require_staff()?;

    let membership = state.services.memberships.upgrade(user_id, request).await?;
    Ok(Json(membership))
}

/// Assign the member barcode
#[utoipa::path(
    put,
    path = "/users/{id}/membership/barcode",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    request_body = AssignBarcode,
    responses(
        (status = 200, description = "Barcode assigned", body = Membership),
        (status = 409, description = "Barcode taken")
    )
)]
pub async fn assign_barcode(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Json(request): Json<AssignBarcode>,
) -> AppResult<Json<Membership>> {
    claims.require_staff()?;

    let membership = state.services.memberships.assign_barcode(user_id, request).await?;
    Ok(Json(membership))
}

/// Deactivate a membership
#[utoipa::path(
    post,
    path = "/users/{id}/membership/deactivate",
    tag = "memberships",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Membership deactivated", body = Membership),
        (status = 404, description = "No membership")
    )
)]
pub async fn deactivate_membership(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Membership>> {
    claims.require_staff()?;

    let membership = state.services.memberships.deactivate(user_id).await?;
    Ok(Json(membership))
}
