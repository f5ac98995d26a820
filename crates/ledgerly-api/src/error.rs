//! HTTP error responses.
//!
//! Every error body is `{error: CODE, message, details?}`. Server-side
//! failures are logged and reported as `INTERNAL_ERROR` without detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value as JsonValue};

use ledgerly_core::FileType;
use ledgerly_payments::ReconcileError;

#[derive(Debug)]
pub enum ApiError {
    NoFile,
    /// `actual_size` is unknown when the body was cut off by the transport limit.
    FileTooLarge {
        max_size: usize,
        actual_size: Option<usize>,
    },
    InvalidFileType { received: String },
    InvalidEmail,
    JobNotFound,
    ProcessingFailed { reason: String, message: String },
    PaymentRequired { unlock_url: String },
    InvalidSignature,
    MalformedPayload(String),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoFile => "NO_FILE",
            ApiError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ApiError::InvalidFileType { .. } => "INVALID_FILE_TYPE",
            ApiError::InvalidEmail => "INVALID_EMAIL",
            ApiError::JobNotFound => "JOB_NOT_FOUND",
            ApiError::ProcessingFailed { .. } => "PROCESSING_FAILED",
            ApiError::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            ApiError::InvalidSignature => "INVALID_SIGNATURE",
            ApiError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::JobNotFound => StatusCode::NOT_FOUND,
            ApiError::ProcessingFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PaymentRequired { .. } => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn message_and_details(&self) -> (String, Option<JsonValue>) {
        match self {
            ApiError::NoFile => ("No file provided".into(), None),
            ApiError::FileTooLarge {
                max_size,
                actual_size,
            } => {
                let mut details = json!({"maxSize": max_size});
                if let Some(actual) = actual_size {
                    details["actualSize"] = json!(actual);
                }
                (
                    format!("File exceeds {}MB limit", max_size / (1024 * 1024)),
                    Some(details),
                )
            }
            ApiError::InvalidFileType { received } => (
                "Invalid file type".into(),
                Some(json!({
                    "validTypes": FileType::supported_mimes(),
                    "receivedType": received,
                })),
            ),
            ApiError::InvalidEmail => ("Invalid email address".into(), None),
            ApiError::JobNotFound => ("Job not found".into(), None),
            ApiError::ProcessingFailed { reason, message } => {
                (message.clone(), Some(json!({"reason": reason})))
            }
            ApiError::PaymentRequired { unlock_url } => (
                "Payment required to access this file".into(),
                Some(json!({"unlockUrl": unlock_url})),
            ),
            ApiError::InvalidSignature => ("Invalid signature".into(), None),
            ApiError::MalformedPayload(msg) => (msg.clone(), None),
            ApiError::BadRequest(msg) => (msg.clone(), None),
            ApiError::Internal(_) => ("Internal server error".into(), None),
        }
    }
}

impl From<ledgerly_core::Error> for ApiError {
    fn from(err: ledgerly_core::Error) -> Self {
        match err {
            ledgerly_core::Error::JobNotFound(_) => ApiError::JobNotFound,
            ledgerly_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::MissingSignature
            | ReconcileError::InvalidSignature
            | ReconcileError::UnknownProvider(_) => ApiError::InvalidSignature,
            ReconcileError::MalformedPayload(msg) => ApiError::MalformedPayload(msg),
            ReconcileError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref detail) = self {
            tracing::error!(error = %detail, "Request failed");
        }

        let status = self.status();
        let (message, details) = self.message_and_details();
        let mut body = json!({
            "error": self.code(),
            "message": message,
        });
        if let Some(details) = details {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::NoFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::FileTooLarge {
                max_size: 1,
                actual_size: Some(2)
            }
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ApiError::JobNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::PaymentRequired {
                unlock_url: String::new()
            }
            .status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let (message, details) = ApiError::Internal("pool timed out".into()).message_and_details();
        assert_eq!(message, "Internal server error");
        assert!(details.is_none());
    }

    #[test]
    fn test_signature_failures_collapse() {
        for err in [
            ReconcileError::MissingSignature,
            ReconcileError::InvalidSignature,
            ReconcileError::UnknownProvider("stripe".into()),
        ] {
            assert_eq!(ApiError::from(err).code(), "INVALID_SIGNATURE");
        }
    }

    #[test]
    fn test_core_error_mapping() {
        assert_eq!(
            ApiError::from(ledgerly_core::Error::JobNotFound("x".into())).code(),
            "JOB_NOT_FOUND"
        );
        assert_eq!(
            ApiError::from(ledgerly_core::Error::Queue("down".into())).code(),
            "INTERNAL_ERROR"
        );
    }
}
