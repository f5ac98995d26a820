//! Payment provider webhooks.
//!
//! The body is taken as raw bytes; signatures cover the exact bytes sent.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use ledgerly_core::ProviderKind;

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/webhooks/stripe`
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, ApiError> {
    receive(&state, ProviderKind::Stripe, &headers, &body).await
}

/// `POST /api/webhooks/xendit`
pub async fn xendit_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, ApiError> {
    receive(&state, ProviderKind::Xendit, &headers, &body).await
}

async fn receive(
    state: &AppState,
    kind: ProviderKind,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<JsonValue>, ApiError> {
    let signature = state
        .reconciler
        .provider(kind)
        .and_then(|p| headers.get(p.signature_header()))
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .reconciler
        .handle_webhook(kind, body, signature)
        .await
        .map_err(|e| {
            if e.is_rejection() {
                warn!(provider = %kind, error = %e, "Webhook rejected");
            }
            ApiError::from(e)
        })?;

    debug!(provider = %kind, ?outcome, "Webhook handled");
    Ok(Json(json!({"received": true})))
}
