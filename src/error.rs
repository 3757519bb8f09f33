//! Error types for Libraria server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::notifications::OutcomeKind;

/// Stable numeric codes returned alongside every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    NotEligible = 5,
    Duplicate = 6,
    OutOfStock = 7,
    AlreadyReturned = 8,
    AlreadyPaid = 9,
    BadValue = 10,
    TryAgain = 11,
}

/// SQLSTATE codes a fresh attempt of the same request can get past:
/// serialization failure, deadlock and unique violation (a concurrent
/// request won the race, the retry will see its effect).
const RETRYABLE_SQLSTATES: [&str; 3] = ["40001", "40P01", "23505"];

const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Already returned: {0}")]
    AlreadyReturned(String),

    #[error("Already paid: {0}")]
    AlreadyPaid(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflicting concurrent update, retry the request: {0}")]
    Retryable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the whole request may be re-run and plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Retryable(_))
    }

    /// Store failures no retry can fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Internal(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Authentication(_) | AppError::NotAuthorized(_) => ErrorCode::NotAuthorized,
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::NotEligible(_) => ErrorCode::NotEligible,
            AppError::DuplicateRequest(_) => ErrorCode::Duplicate,
            AppError::OutOfStock(_) => ErrorCode::OutOfStock,
            AppError::AlreadyReturned(_) => ErrorCode::AlreadyReturned,
            AppError::AlreadyPaid(_) => ErrorCode::AlreadyPaid,
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::Retryable(_) => ErrorCode::TryAgain,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    /// How the failure is shown to the user it concerns
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            AppError::Retryable(_) => OutcomeKind::Warning,
            _ => OutcomeKind::Error,
        }
    }

    /// Message safe to show to the person who made the request
    pub fn user_message(&self) -> String {
        match self {
            AppError::Authentication(msg)
            | AppError::NotAuthorized(msg)
            | AppError::NotFound(msg)
            | AppError::NotEligible(msg)
            | AppError::DuplicateRequest(msg)
            | AppError::OutOfStock(msg)
            | AppError::AlreadyReturned(msg)
            | AppError::AlreadyPaid(msg)
            | AppError::Validation(msg) => msg.clone(),
            AppError::Retryable(_) => {
                "The library was busy with another request, please try again".to_string()
            }
            AppError::Database(_) => "Database error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        let retryable = match &e {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| RETRYABLE_SQLSTATES.iter().any(|c| code == *c))
                .unwrap_or(false),
            _ => false,
        };

        let still_referenced = matches!(
            &e,
            sqlx::Error::Database(db) if db.code().is_some_and(|code| code == FOREIGN_KEY_VIOLATION)
        );

        if retryable {
            AppError::Retryable(e.to_string())
        } else if still_referenced {
            AppError::Validation("Record is still referenced by lending history".to_string())
        } else {
            AppError::Database(e)
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateRequest(_)
            | AppError::OutOfStock(_)
            | AppError::AlreadyReturned(_)
            | AppError::AlreadyPaid(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Retryable(msg) => {
                tracing::warn!("Retryable store conflict: {}", msg);
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let code = self.code();
        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message: self.user_message(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::NotEligible("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::DuplicateRequest("x".into()), StatusCode::CONFLICT),
            (AppError::OutOfStock("x".into()), StatusCode::CONFLICT),
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Retryable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_other_store_errors_are_fatal() {
        let err: AppError = sqlx::Error::PoolClosed.into();
        assert!(err.is_fatal());
        assert_eq!(err.user_message(), "Database error");
    }
}
