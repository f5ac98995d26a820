//! Error types for ledgerly.

use thiserror::Error;

/// Result type alias using ledgerly's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ledgerly operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Bytes could not be parsed as the declared document type at all.
    /// Never retried.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Document extraction failed for a reason that may clear up on retry
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Structuring backend call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Processing queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Payment ledger or provider error
    #[error("Payment error: {0}")]
    Payment(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a job that hit this error should be delivered again.
    ///
    /// Format errors are permanent; everything else is treated as transient
    /// and left to the queue's bounded retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::UnsupportedFormat(_) | Error::InvalidInput(_) | Error::JobNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_job_not_found() {
        let err = Error::JobNotFound("abc123".to_string());
        assert_eq!(err.to_string(), "Job not found: abc123");
    }

    #[test]
    fn test_error_display_unsupported_format() {
        let err = Error::UnsupportedFormat("missing %PDF header".to_string());
        assert_eq!(err.to_string(), "Unsupported format: missing %PDF header");
    }

    #[test]
    fn test_error_display_queue() {
        let err = Error::Queue("lease lost".to_string());
        assert_eq!(err.to_string(), "Queue error: lease lost");
    }

    #[test]
    fn test_error_display_payment() {
        let err = Error::Payment("ledger unavailable".to_string());
        assert_eq!(err.to_string(), "Payment error: ledger unavailable");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_unsupported_format_is_not_retryable() {
        assert!(!Error::UnsupportedFormat("x".into()).is_retryable());
        assert!(!Error::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Extraction("x".into()).is_retryable());
        assert!(Error::Inference("x".into()).is_retryable());
        assert!(Error::Internal("x".into()).is_retryable());
        assert!(Error::Request("x".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }
}
