//! Paid spreadsheet download.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::error::ApiError;
use crate::handlers::path_job_id;
use crate::services::{GateDecision, XLSX_CONTENT_TYPE};
use crate::state::AppState;

/// `GET /api/download/:job_id`
pub async fn download_statement(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = path_job_id(&raw_id)?;

    match state.gate.authorize(&job_id).await? {
        GateDecision::Authorized(file) => {
            info!(%job_id, bytes = file.bytes.len(), "Statement downloaded");
            let disposition = format!("attachment; filename=\"{}\"", file.filename);
            let length = file.bytes.len().to_string();
            Ok((
                [
                    (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                    (header::CONTENT_LENGTH, length),
                ],
                file.bytes,
            )
                .into_response())
        }
        GateDecision::Denied { unlock_path, .. } => Err(ApiError::PaymentRequired {
            unlock_url: state.config.link(&unlock_path),
        }),
    }
}
