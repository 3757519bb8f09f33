//! Reservation queue endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{Reservation, ReservationFilter},
    AppState,
};

use super::AuthenticatedUser;

/// Enqueue request
#[derive(Deserialize, ToSchema)]
pub struct CreateReservation {
    pub user_id: i32,
    pub book_id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct ExpireResponse {
    /// Holds that lapsed and were released
    pub expired: usize,
}

/// List all reservations
#[utoipa::path(
    get,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reservations, newest first", body = Vec<Reservation>)
    )
)]
pub async fn list_reservations(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Reservation>>> {
    claims.require_staff()?;

    let reservations = state
        .services
        .reservations
        .list_reservations(ReservationFilter::default())
        .await?;
    Ok(Json(reservations))
}

/// Put a user in the queue of a book
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    request_body = CreateReservation,
    responses(
        (status = 201, description = "Reservation queued", body = Reservation),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Already queued or borrowed")
    )
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateReservation>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    claims.require_staff()?;

    let reservation = state
        .services
        .retry_for(request.user_id, || {
            state.services.reservations.reserve(request.user_id, request.book_id)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Queue of a book
#[utoipa::path(
    get,
    path = "/books/{id}/queue",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Open reservations in queue order", body = Vec<Reservation>),
        (status = 404, description = "Book not found")
    )
)]
pub async fn book_queue(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<Json<Vec<Reservation>>> {
    let queue = state.services.reservations.queue_for_book(book_id).await?;
    Ok(Json(queue))
}

/// Reservations of a user
#[utoipa::path(
    get,
    path = "/users/{id}/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "The user's reservations, newest first", body = Vec<Reservation>)
    )
)]
pub async fn user_reservations(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<Reservation>>> {
    claims.require_self_or_staff(user_id)?;

    let reservations = state
        .services
        .reservations
        .reservations_for_user(user_id)
        .await?;
    Ok(Json(reservations))
}

/// Cancel a reservation
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Reservation cancelled", body = Reservation),
        (status = 400, description = "Reservation already closed"),
        (status = 403, description = "Not the reservant"),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(reservation_id): Path<i32>,
) -> AppResult<Json<Reservation>> {
    let actor = claims.actor();
    let reservation = state
        .services
        .retry_for(actor.user_id, || {
            state.services.reservations.cancel(actor, reservation_id)
        })
        .await?;
    Ok(Json(reservation))
}

/// Expire lapsed holds now
#[utoipa::path(
    post,
    path = "/reservations/expire",
    tag = "reservations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Lapsed holds expired", body = ExpireResponse)
    )
)]
pub async fn expire_holds(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ExpireResponse>> {
    claims.require_staff()?;

    let expired = state
        .services
        .retry(|| state.services.reservations.expire_holds())
        .await?;
    Ok(Json(ExpireResponse { expired }))
}
