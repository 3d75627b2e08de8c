//! Error types for cofferd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coffer_core::CofferError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Coffer(#[from] CofferError),

    /// Malformed request the engine never saw
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Coffer(err) => match err {
                CofferError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                CofferError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                CofferError::InvalidCapability(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_CAPABILITY")
                }
                CofferError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                CofferError::InsufficientBudget { .. } => {
                    (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BUDGET")
                }
                CofferError::Conflict(_) | CofferError::AlreadyConsumed(_) => {
                    (StatusCode::CONFLICT, "CONFLICT")
                }
                CofferError::GatewayUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE")
                }
                CofferError::DirectoryUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "DIRECTORY_UNAVAILABLE")
                }
                CofferError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
