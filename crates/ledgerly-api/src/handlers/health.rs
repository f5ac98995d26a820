use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use tracing::warn;

use crate::state::AppState;

/// `GET /health`. Queue depth is `null` when the queue cannot be read.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let queue_depth = match state.queue.pending_count().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "Queue depth unavailable");
            None
        }
    };
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "queueDepth": queue_depth,
    }))
}
