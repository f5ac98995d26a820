//! Job status and preview polling.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::debug;

use ledgerly_core::defaults::{
    PREVIEW_ROW_LIMIT, PROCESSING_PROGRESS_PERCENT, PROCESSING_REMAINING_SECS,
};
use ledgerly_core::{FailureCode, Job, JobState};

use crate::error::ApiError;
use crate::handlers::path_job_id;
use crate::services::unlock_path;
use crate::state::AppState;

/// `GET /api/preview/:job_id`
pub async fn get_preview(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = path_job_id(&raw_id)?;
    let job = state
        .jobs
        .get(&job_id)
        .await?
        .ok_or(ApiError::JobNotFound)?;

    match &job.state {
        JobState::Uploaded => {
            let position = state.queue.position(&job_id).await?.unwrap_or(1);
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({"status": "queued", "position": position})),
            )
                .into_response())
        }
        JobState::Processing => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "processing",
                "progress": PROCESSING_PROGRESS_PERCENT,
                "estimatedSecondsRemaining": PROCESSING_REMAINING_SECS,
            })),
        )
            .into_response()),
        JobState::Completed { .. } => Ok(Json(completed_body(&state, &job)).into_response()),
        JobState::Failed { reason, .. } => {
            debug!(%job_id, code = reason.code.as_str(), "Preview of failed job");
            // Retry exhaustion messages carry internal errors
            let message = match reason.code {
                FailureCode::RetriesExhausted => "File processing failed".to_string(),
                _ => reason.message.clone(),
            };
            Err(ApiError::ProcessingFailed {
                reason: reason.code.as_str().to_string(),
                message,
            })
        }
    }
}

fn completed_body(state: &AppState, job: &Job) -> serde_json::Value {
    let Some(preview) = job.state.preview() else {
        return json!({"jobId": job.job_id, "status": job.status().as_str()});
    };
    json!({
        "jobId": job.job_id,
        "status": job.status().as_str(),
        "preview": {
            "columns": preview.columns,
            "rows": preview.head(PREVIEW_ROW_LIMIT),
            "totalRows": preview.row_count(),
            "confidenceScore": preview.confidence_score,
            "fileType": job.file_type.mime(),
            "detectedBank": preview.detected_bank,
            "statementPeriod": preview.statement_period,
            "needsReview": preview.needs_review(state.config.ai_confidence_threshold),
            "warnings": preview.warnings,
        },
        "paid": job.is_paid(),
        "unlockUrl": state.config.link(&unlock_path(&job.job_id)),
    })
}
