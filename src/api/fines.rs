//! Fine and payment endpoints

use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::{
    error::AppResult,
    models::{Fine, FineSummary, Payment, RecordPayment},
    AppState,
};

use super::AuthenticatedUser;

/// Fines of a user, recalculated first
#[utoipa::path(
    get,
    path = "/users/{id}/fines",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Unpaid and paid fines", body = FineSummary)
    )
)]
pub async fn user_fines(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<FineSummary>> {
    claims.require_self_or_staff(user_id)?;

    let summary = state
        .services
        .retry(|| state.services.fines.fines_for_user(user_id))
        .await?;
    Ok(Json(summary))
}

/// Get a fine
#[utoipa::path(
    get,
    path = "/fines/{id}",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Fine ID")
    ),
    responses(
        (status = 200, description = "Fine", body = Fine),
        (status = 404, description = "Fine not found")
    )
)]
pub async fn get_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(fine_id): Path<i32>,
) -> AppResult<Json<Fine>> {
    let fine = state.services.fines.fine(claims.actor(), fine_id).await?;
    Ok(Json(fine))
}

/// Pay a fine
#[utoipa::path(
    post,
    path = "/fines/{id}/payments",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Fine ID")
    ),
    request_body = RecordPayment,
    responses(
        (status = 201, description = "Payment recorded", body = Payment),
        (status = 400, description = "Missing transaction reference"),
        (status = 403, description = "Not your fine"),
        (status = 409, description = "Fine already paid or a payment is outstanding")
    )
)]
pub async fn record_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(fine_id): Path<i32>,
    Json(request): Json<RecordPayment>,
) -> AppResult<(StatusCode, Json<Payment>)> {
    let actor = claims.actor();
    let payment = state
        .services
        .retry_for(actor.user_id, || {
            state.services.fines.record_payment(actor, fine_id, request.clone())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Payments waiting for verification
#[utoipa::path(
    get,
    path = "/payments/pending",
    tag = "fines",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Outstanding payments, oldest first", body = Vec<Payment>)
    )
)]
pub async fn pending_payments(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Payment>>> {
    claims.require_staff()?;

    let payments = state.services.fines.pending_payments().await?;
    Ok(Json(payments))
}

/// Get a payment
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment", body = Payment),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn get_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(payment_id): Path<i32>,
) -> AppResult<Json<Payment>> {
    let payment = state.services.fines.payment(claims.actor(), payment_id).await?;
    Ok(Json(payment))
}

/// Confirm a payment
#[utoipa::path(
    post,
    path = "/payments/{id}/confirm",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment confirmed, fine paid", body = Payment),
        (status = 400, description = "Payment is not outstanding"),
        (status = 409, description = "Fine already paid")
    )
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(payment_id): Path<i32>,
) -> AppResult<Json<Payment>> {
    claims.require_staff()?;

    let actor = claims.actor();
    let payment = state
        .services
        .retry(|| state.services.fines.confirm_payment(actor, payment_id))
        .await?;
    Ok(Json(payment))
}

/// Reject a payment
#[utoipa::path(
    post,
    path = "/payments/{id}/reject",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment rejected", body = Payment),
        (status = 400, description = "Payment is not outstanding")
    )
)]
pub async fn reject_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(payment_id): Path<i32>,
) -> AppResult<Json<Payment>> {
    claims.require_staff()?;

    let actor = claims.actor();
    let payment = state
        .services
        .retry(|| state.services.fines.reject_payment(actor, payment_id))
        .await?;
    Ok(Json(payment))
}

/// Receipt of a paid payment
#[utoipa::path(
    get,
    path = "/payments/{id}/receipt",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Receipt document", content_type = "text/plain"),
        (status = 400, description = "Payment not confirmed yet"),
        (status = 403, description = "Not your payment")
    )
)]
pub async fn payment_receipt(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(payment_id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    let document = state.services.fines.receipt(claims.actor(), payment_id).await?;
    let content_type = state.services.fines.receipt_content_type();
    Ok(([(CONTENT_TYPE, content_type)], document))
}
