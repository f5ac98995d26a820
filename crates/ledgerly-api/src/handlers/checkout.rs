//! Checkout initiation.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use ledgerly_payments::{CheckoutRequest, Plan};

use crate::error::ApiError;
use crate::handlers::path_job_id;
use crate::handlers::upload::is_valid_email;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub job_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub plan: Plan,
}

/// `POST /api/checkout`
///
/// Records a pending payment and returns the reference the provider will
/// echo back. Creating the hosted checkout page is the client's job.
pub async fn begin_checkout(
    State(state): State<AppState>,
    body: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let email = body
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    if let Some(ref address) = email {
        if !is_valid_email(address) {
            return Err(ApiError::InvalidEmail);
        }
    }

    let session = state
        .checkout
        .begin(CheckoutRequest {
            job_id: path_job_id(&body.job_id)?,
            email,
            currency: body.currency,
            plan: body.plan,
        })
        .await?;

    Ok(Json(json!({
        "jobId": session.payment.job_id,
        "paymentId": session.payment.id,
        "provider": session.provider,
        "amount": session.amount,
        "currency": session.currency,
        "externalId": session.external_id,
        "status": session.payment.status,
    })))
}
