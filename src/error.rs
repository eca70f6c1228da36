//! Error types and HTTP error response handling.
//!
//! Every layer has its own error enum (`StoreError`, `TransferError`,
//! `UserError`, `TokenError`). `AppError` collects them at the HTTP boundary
//! and decides the status code and JSON body a client sees.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::services::{transfer_service::TransferError, user_service::UserError};
use crate::store::StoreError;
use crate::token::TokenError;

/// Application-wide error type returned by every handler.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Request body, path or query is invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("{0}")]
    InvalidRequest(String),

    /// Missing or bad credentials, or the caller does not own the resource.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    /// Returns HTTP 422 Unprocessable Entity.
    #[error("account {account_id} has insufficient funds")]
    InsufficientFunds { account_id: i64 },

    /// Any classified store failure; the status depends on the kind.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Returns HTTP 500. Details are logged, never sent.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidArgument(msg) => AppError::InvalidRequest(msg),
            TransferError::InsufficientFunds { account_id, .. } => {
                AppError::InsufficientFunds { account_id }
            }
            TransferError::Store(err) => AppError::Store(err),
        }
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Token(err) => AppError::Token(err),
            UserError::Store(err) => AppError::Store(err),
            UserError::Hash(msg) => AppError::Internal(msg),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::InvalidRequest(errors.to_string())
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidRequest` → 400 Bad Request
/// - `Unauthorized`, `Token` → 401 Unauthorized
/// - `Store(ConstraintViolation)` → 403 Forbidden
/// - `Store(NotFound)` → 404 Not Found
/// - `Store(Conflict)` → 409 Conflict
/// - `InsufficientFunds` → 422 Unprocessable Entity
/// - `Store(Unavailable | Cancelled)` → 503 Service Unavailable
/// - `Store(Timeout)` → 504 Gateway Timeout
/// - `Internal` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Unauthorized(ref msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::Token(ref err) => (StatusCode::UNAUTHORIZED, "invalid_token", err.to_string()),
            AppError::InsufficientFunds { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_funds",
                self.to_string(),
            ),
            AppError::Store(ref err) => match err {
                StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
                StoreError::ConstraintViolation(_) => {
                    (StatusCode::FORBIDDEN, "constraint_violation", err.to_string())
                }
                StoreError::Conflict => (StatusCode::CONFLICT, "conflict", err.to_string()),
                StoreError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string()),
                StoreError::Cancelled => {
                    (StatusCode::SERVICE_UNAVAILABLE, "cancelled", err.to_string())
                }
                StoreError::Unavailable(reason) => {
                    tracing::warn!(%reason, "store unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "unavailable",
                        "Service temporarily unavailable".to_string(),
                    )
                }
            },
            AppError::Internal(ref detail) => {
                tracing::error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
