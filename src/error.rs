//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::StoreError;
use crate::domain::{to_points, DomainError};

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("{0}")]
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => AppError::Domain(e),
            other => AppError::Store(other),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key", None),

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::MalformedNumber(raw) => {
                    (StatusCode::BAD_REQUEST, "malformed_order_number", Some(raw.clone()))
                }
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_input", Some(msg.clone()))
                }
                DomainError::Checksum(number) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invalid_order_number",
                    Some(number.to_string()),
                ),
                DomainError::UserExists(login) => {
                    (StatusCode::CONFLICT, "login_taken", Some(login.clone()))
                }
                DomainError::OrderOwnedByOther(number) => (
                    StatusCode::CONFLICT,
                    "order_owned_by_other",
                    Some(number.to_string()),
                ),
                DomainError::StatusRegression { .. } => {
                    (StatusCode::CONFLICT, "status_regression", Some(domain_err.to_string()))
                }
                // Same person re-submitting is success-equivalent
                DomainError::DuplicateOrder(number) => {
                    (StatusCode::OK, "order_already_submitted", Some(number.to_string()))
                }
                DomainError::InsufficientFunds {
                    required,
                    available,
                } => (
                    StatusCode::PAYMENT_REQUIRED,
                    "insufficient_funds",
                    Some(format!(
                        "required {}, available {}",
                        to_points(*required),
                        to_points(*available)
                    )),
                ),
                DomainError::InvalidCredentials => {
                    (StatusCode::UNAUTHORIZED, "invalid_credentials", None)
                }
                DomainError::NoFixedBalance(number) => {
                    (StatusCode::NOT_FOUND, "no_fixed_balance", Some(number.clone()))
                }
                DomainError::OrderNotFound(number) => {
                    (StatusCode::NOT_FOUND, "order_not_found", Some(number.to_string()))
                }
                DomainError::PersonNotFound(id) | DomainError::NoAccount(id) => {
                    (StatusCode::NOT_FOUND, "person_not_found", Some(id.to_string()))
                }
            },

            // 503 / 500
            AppError::Store(StoreError::Timeout { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "timeout", None)
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.parts();

        match &self {
            AppError::Store(e) => tracing::error!(error = ?e, "Store error"),
            _ => tracing::debug!(error = %self, status = status.as_u16(), "Request rejected"),
        }

        let error = match &self {
            AppError::Store(StoreError::Timeout { .. }) => "Request timed out".to_string(),
            AppError::Store(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
