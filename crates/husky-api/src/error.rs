//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping internal errors to appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use husky_chat::ChatError;
use husky_core::error::HuskyError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Present and true when the client may retry the same request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - provider down, circuit open, or the turn
    /// cancelled before completing; retryable.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, retryable) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                Some(true),
            ),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            retryable,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match &err {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) | ChatError::Invalid(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ChatError::NotFound(what) => ApiError::NotFound(what.clone()),
            // A cancelled turn did nothing wrong; the client may retry.
            ChatError::Cancelled | ChatError::Retryable(_) => {
                ApiError::Unavailable(err.to_string())
            }
            ChatError::Storage(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<HuskyError> for ApiError {
    fn from(err: HuskyError) -> Self {
        match &err {
            HuskyError::Validation(msg) => ApiError::BadRequest(msg.clone()),
            HuskyError::NotFound(what) => ApiError::NotFound(what.clone()),
            HuskyError::TransientProvider(_)
            | HuskyError::RateLimited { .. }
            | HuskyError::CircuitOpen => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
