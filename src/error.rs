//! Error handling module
//!
//! HTTP-facing error type and response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::jobs::{JobId, QueueError};
use crate::ledger::LedgerError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid service API key")]
    InvalidApiKey,

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Domain(domain) => AppError::Domain(domain),
            LedgerError::Internal(msg) => AppError::Internal(msg),
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

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidHeader(header) => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::MissingHeader(header) => {
                (StatusCode::UNAUTHORIZED, "missing_header", Some(header.clone()))
            }
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key", None),

            // 404 Not Found
            AppError::JobNotFound(id) => {
                (StatusCode::NOT_FOUND, "job_not_found", Some(id.to_string()))
            }

            // Domain errors keep their own code
            AppError::Domain(domain_err) => {
                let status = match domain_err {
                    DomainError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                    DomainError::AccountExists(_) => StatusCode::CONFLICT,
                    DomainError::NegativeAmount(_)
                    | DomainError::InvalidAmount(_)
                    | DomainError::InsufficientFunds { .. }
                    | DomainError::SameAccount => StatusCode::BAD_REQUEST,
                };
                (status, domain_err.code(), Some(domain_err.to_string()))
            }

            // 500 Internal Server Error
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Queue(e) => {
                tracing::error!("Queue error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        // Server-side failures stay opaque to clients
        let error = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_domain_statuses() {
        assert_eq!(
            status_of(DomainError::AccountNotFound(1).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DomainError::AccountExists(1).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DomainError::insufficient_funds(dec!(5), dec!(1)).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(DomainError::SameAccount.into()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_header_statuses() {
        assert_eq!(
            status_of(AppError::MissingHeader("X-Request-User-Id".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AppError::InvalidHeader("X-Request-User-Id".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(AppError::InvalidApiKey), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_ledger_internal_is_500() {
        let err = AppError::from(LedgerError::Internal("lock timeout".into()));
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
