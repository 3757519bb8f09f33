//! API handlers for the Libraria REST endpoints

pub mod books;
pub mod dashboard;
pub mod fines;
pub mod health;
pub mod lending;
pub mod memberships;
pub mod notifications;
pub mod openapi;
pub mod reservations;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::AppError,
    models::{Actor, Role},
    AppState,
};

/// Claims of the bearer token issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: i32,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    /// Sign the claims, used by tests and tooling
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            role: self.role,
        }
    }

    // Authorization checks
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::NotAuthorized("Librarian rights required".to_string()))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::NotAuthorized("Administrator rights required".to_string()))
        }
    }

    pub fn require_self_or_staff(&self, user_id: i32) -> Result<(), AppError> {
        if self.actor().may_act_for(user_id) {
            Ok(())
        } else {
            Err(AppError::NotAuthorized(
                "You can only access your own records".to_string(),
            ))
        }
    }
}

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub Claims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = Claims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedUser(claims))
    }
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Catalog
        .route("/books", get(books::list_books).post(books::create_book))
        .route(
            "/books/:id",
            get(books::get_book)
                .put(books::update_book)
                .delete(books::delete_book),
        )
        .route("/books/:id/queue", get(reservations::book_queue))
        // Lending
        .route("/borrows", post(lending::request_borrow))
        .route("/issues", get(lending::list_issues))
        .route("/issues/:id", get(lending::get_issue))
        .route("/issues/:id/return", post(lending::return_book))
        .route("/users/:id/issues", get(lending::user_issues))
        // Reservations
        .route(
            "/reservations",
            get(reservations::list_reservations).post(reservations::create_reservation),
        )
        .route("/reservations/expire", post(reservations::expire_holds))
        .route("/reservations/:id/cancel", post(reservations::cancel_reservation))
        .route("/users/:id/reservations", get(reservations::user_reservations))
        // Fines and payments
        .route("/users/:id/fines", get(fines::user_fines))
        .route("/fines/:id", get(fines::get_fine))
        .route("/fines/:id/payments", post(fines::record_payment))
        .route("/payments/pending", get(fines::pending_payments))
        .route("/payments/:id", get(fines::get_payment))
        .route("/payments/:id/confirm", post(fines::confirm_payment))
        .route("/payments/:id/reject", post(fines::reject_payment))
        .route("/payments/:id/receipt", get(fines::payment_receipt))
        // Memberships
        .route("/memberships", get(memberships::list_memberships))
        .route(
            "/users/:id/membership",
            get(memberships::get_membership).post(memberships::register_membership),
        )
        .route("/users/:id/membership/type", put(memberships::upgrade_membership))
        .route("/users/:id/membership/barcode", put(memberships::assign_barcode))
        .route("/users/:id/membership/deactivate", post(memberships::deactivate_membership))
        // Dashboards
        .route("/dashboard/admin", get(dashboard::admin_dashboard))
        .route("/dashboard/librarian", get(dashboard::librarian_dashboard))
        .route("/dashboard/student", get(dashboard::student_dashboard))
        // Notifications
        .route("/notifications", get(notifications::drain_notifications))
        .with_state(state);

    let openapi = openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
