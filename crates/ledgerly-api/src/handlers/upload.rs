//! Statement intake.

use std::sync::OnceLock;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use regex::Regex;
use serde_json::json;
use tracing::{error, info, instrument};

use ledgerly_core::defaults::ESTIMATED_PROCESSING_SECS;
use ledgerly_core::{FailureReason, FileType, JobId, QueueMessage};

use crate::error::ApiError;
use crate::state::AppState;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    email_pattern().is_match(email)
}

struct UploadedFile {
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// `POST /api/upload`: multipart `file` plus optional `email`.
///
/// Returns once the job row and its queue message both exist.
#[instrument(skip(state, multipart), fields(subsystem = "api", op = "upload"))]
pub async fn upload_statement(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let max_size = state.config.max_file_size;
    let mut file: Option<UploadedFile> = None;
    let mut email: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::FileTooLarge {
                max_size,
                actual_size: None,
            }
        } else {
            ApiError::BadRequest(format!("Failed to read upload: {}", e))
        }
    })? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("statement").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        ApiError::FileTooLarge {
                            max_size,
                            actual_size: None,
                        }
                    } else {
                        ApiError::BadRequest(format!("Failed to read file: {}", e))
                    }
                })?;
                file = Some(UploadedFile {
                    name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("email") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read email: {}", e)))?;
                let text = text.trim();
                if !text.is_empty() {
                    email = Some(text.to_string());
                }
            }
            _ => {}
        }
    }

    let file = file.filter(|f| !f.bytes.is_empty()).ok_or(ApiError::NoFile)?;

    if file.bytes.len() > max_size {
        return Err(ApiError::FileTooLarge {
            max_size,
            actual_size: Some(file.bytes.len()),
        });
    }

    let file_type =
        FileType::from_mime(&file.content_type).ok_or_else(|| ApiError::InvalidFileType {
            received: file.content_type.clone(),
        })?;

    if let Some(ref address) = email {
        if !is_valid_email(address) {
            return Err(ApiError::InvalidEmail);
        }
    }

    let job_id = JobId::generate();
    let size = file.bytes.len();
    state.jobs.create(&job_id, file_type).await?;

    let message = QueueMessage::new(job_id.clone(), file_type, file.bytes, file.name, email);
    if let Err(e) = state
        .queue
        .enqueue(message, state.config.queue_max_attempts)
        .await
    {
        error!(%job_id, error = %e, "Enqueue failed");
        if let Err(fail_err) = state
            .jobs
            .fail(&job_id, FailureReason::retries_exhausted("could not be queued"))
            .await
        {
            error!(%job_id, error = %fail_err, "Could not mark unqueued job failed");
        }
        return Err(e.into());
    }

    info!(%job_id, file_type = %file_type, size, "Statement accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "jobId": job_id,
            "status": "processing",
            "estimatedTime": ESTIMATED_PROCESSING_SECS,
            "previewUrl": state.config.link(&format!("/api/preview/{}", job_id)),
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("buyer@example.com"));
        assert!(is_valid_email("a.b+tag@sub.example.co.id"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("space @example.com"));
        assert!(!is_valid_email("missing@tld"));
    }
}
