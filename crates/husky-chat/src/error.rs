//! Error types for the conversation layer.

use husky_core::error::HuskyError;

/// Errors from a chat turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("turn cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Provider-side failure the client may retry.
    #[error("model temporarily unavailable: {0}")]
    Retryable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Whether the client should retry the same turn later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Retryable(_))
    }
}

impl From<HuskyError> for ChatError {
    fn from(err: HuskyError) -> Self {
        match err {
            HuskyError::NotFound(what) => ChatError::NotFound(what),
            HuskyError::Validation(msg) => ChatError::Invalid(msg),
            HuskyError::TransientProvider(_)
            | HuskyError::RateLimited { .. }
            | HuskyError::CircuitOpen => ChatError::Retryable(err.to_string()),
            other => ChatError::Storage(other.to_string()),
        }
    }
}
