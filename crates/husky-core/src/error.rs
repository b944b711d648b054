use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the Husky assistant backend.
///
/// The provider-facing variants (`TransientProvider`, `RateLimited`,
/// `CircuitOpen`) are distinguishable so the gateway can decide what to
/// retry and callers can decide what to surface as "try again".
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HuskyError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Provider rate limited: {message}")]
    RateLimited {
        message: String,
        /// Provider-supplied wait hint (e.g. a Retry-After header).
        retry_after: Option<Duration>,
    },

    #[error("Provider circuit open; failing fast until cool-down expires")]
    CircuitOpen,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HuskyError {
    /// Whether the gateway's retry policy should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HuskyError::TransientProvider(_) | HuskyError::RateLimited { .. }
        )
    }
}

impl From<toml::de::Error> for HuskyError {
    fn from(err: toml::de::Error) -> Self {
        HuskyError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HuskyError {
    fn from(err: toml::ser::Error) -> Self {
        HuskyError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for HuskyError {
    fn from(err: serde_json::Error) -> Self {
        HuskyError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Husky operations.
pub type Result<T> = std::result::Result<T, HuskyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HuskyError::Validation("empty message".to_string());
        assert_eq!(err.to_string(), "Validation error: empty message");

        let err = HuskyError::NotFound("thread 42".to_string());
        assert_eq!(err.to_string(), "Not found: thread 42");
    }

    #[test]
    fn test_rate_limited_display_and_hint() {
        let err = HuskyError::RateLimited {
            message: "429".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(err.to_string().contains("rate limited"));
        match err {
            HuskyError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            _ => panic!("expected RateLimited"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(HuskyError::TransientProvider("timeout".into()).is_retryable());
        assert!(HuskyError::RateLimited {
            message: "slow down".into(),
            retry_after: None,
        }
        .is_retryable());

        assert!(!HuskyError::Validation("bad input".into()).is_retryable());
        assert!(!HuskyError::CircuitOpen.is_retryable());
        assert!(!HuskyError::NotFound("x".into()).is_retryable());
        assert!(!HuskyError::Persistence("disk".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HuskyError = io_err.into();
        assert!(matches!(err, HuskyError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_conversion() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: HuskyError = bad.unwrap_err().into();
        assert!(matches!(err, HuskyError::Serialization(_)));
    }

    #[test]
    fn test_toml_conversion() {
        let bad: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: HuskyError = bad.unwrap_err().into();
        assert!(matches!(err, HuskyError::Config(_)));
    }

    #[test]
    fn test_result_with_question_mark() {
        fn inner() -> Result<i32> {
            let io: std::result::Result<i32, std::io::Error> = Ok(7);
            Ok(io?)
        }
        assert_eq!(inner().unwrap(), 7);
    }
}
