//! Checkout initiation: records a pending payment for a completed job.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;
use tracing::info;

use ledgerly_core::{
    Error, JobId, JobStatus, JobStore, NewPayment, Payment, PaymentLedger, ProviderKind, Result,
};

use crate::pricing::{price_for, Plan};
use crate::xendit::external_id_for;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub job_id: JobId,
    pub email: Option<String>,
    pub currency: String,
    pub plan: Plan,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub provider: ProviderKind,
    pub amount: f64,
    pub currency: String,
    /// Reference the provider echoes back in its webhook.
    pub external_id: String,
    pub payment: Payment,
}

pub struct CheckoutService {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn PaymentLedger>,
}

impl CheckoutService {
    pub fn new(jobs: Arc<dyn JobStore>, ledger: Arc<dyn PaymentLedger>) -> Self {
        Self { jobs, ledger }
    }

    pub async fn begin(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        let job = self
            .jobs
            .get(&request.job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(request.job_id.to_string()))?;

        if job.status() != JobStatus::Completed {
            return Err(Error::InvalidInput(format!(
                "Job {} is {}, only completed jobs can be purchased",
                job.job_id,
                job.status().as_str()
            )));
        }
        if job.is_paid() || self.ledger.has_completed(&job.job_id).await? {
            return Err(Error::InvalidInput(format!(
                "Job {} is already paid",
                job.job_id
            )));
        }

        let price = price_for(&request.currency, request.plan).ok_or_else(|| {
            Error::InvalidInput(format!("Unsupported currency: {}", request.currency))
        })?;

        let external_id = match price.provider {
            ProviderKind::Xendit => external_id_for(&job.job_id, Utc::now().timestamp()),
            ProviderKind::Stripe => job.job_id.to_string(),
        };

        let mut extra = Map::new();
        extra.insert("externalId".into(), external_id.clone().into());
        extra.insert(
            "plan".into(),
            serde_json::to_value(request.plan).unwrap_or_default(),
        );

        let payment = self
            .ledger
            .record_pending(NewPayment {
                job_id: job.job_id.clone(),
                email: request.email,
                amount: price.amount,
                currency: price.currency.to_string(),
                provider: price.provider,
                provider_payment_id: None,
                metadata: NewPayment::metadata_with(price.provider, None, extra),
            })
            .await?;

        info!(
            job_id = %job.job_id,
            provider = %price.provider,
            amount = price.amount,
            currency = price.currency,
            "Checkout started"
        );

        Ok(CheckoutSession {
            provider: price.provider,
            amount: price.amount,
            currency: price.currency.to_string(),
            external_id,
            payment,
        })
    }
}
