//! Webhook reconciliation errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Signature header missing")]
    MissingSignature,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// No provider is configured for the requested kind.
    #[error("Payment provider not configured: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Store(#[from] ledgerly_core::Error),
}

impl ReconcileError {
    /// Errors raised before any state was touched.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, ReconcileError::Store(_))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(e: serde_json::Error) -> Self {
        ReconcileError::MalformedPayload(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_not_rejections() {
        let err = ReconcileError::from(ledgerly_core::Error::Payment("down".into()));
        assert!(!err.is_rejection());
        assert!(ReconcileError::InvalidSignature.is_rejection());
    }

    #[test]
    fn test_json_error_is_malformed() {
        let err: ReconcileError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ReconcileError::MalformedPayload(_)));
    }
}
