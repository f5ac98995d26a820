//! Applies verified provider events to the payment ledger and job store.
//!
//! Every effect here is idempotent: providers redeliver webhooks until they
//! see a 2xx, so the same event may arrive any number of times.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use ledgerly_core::{
    Error, JobId, JobStore, NewPayment, PaymentLedger, ProviderKind, RecordOutcome, Transition,
};

use crate::error::ReconcileError;
use crate::provider::{PaidEvent, PaymentEvent, PaymentProvider};

/// What a webhook changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Paid {
        job_id: JobId,
        ledger: RecordOutcome,
        /// False when the job record does not exist.
        job_updated: bool,
    },
    Confirmed {
        job_id: JobId,
        upgraded: u64,
    },
    Expired {
        job_id: JobId,
        applied: bool,
    },
    /// Acknowledged without effect.
    NoOp { reason: String },
}

pub struct PaymentReconciler {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn PaymentLedger>,
}

impl PaymentReconciler {
    pub fn new(jobs: Arc<dyn JobStore>, ledger: Arc<dyn PaymentLedger>) -> Self {
        Self {
            providers: HashMap::new(),
            jobs,
            ledger,
        }
    }

    /// Register a provider. Replaces any existing provider of the same kind.
    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&Arc<dyn PaymentProvider>> {
        self.providers.get(&kind)
    }

    /// Verify, parse and apply one webhook delivery.
    ///
    /// Nothing is parsed or written unless the signature checks out.
    #[instrument(skip(self, raw, signature), fields(subsystem = "payments", provider = %kind))]
    pub async fn handle_webhook(
        &self,
        kind: ProviderKind,
        raw: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let provider = self
            .providers
            .get(&kind)
            .ok_or_else(|| ReconcileError::UnknownProvider(kind.to_string()))?;

        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ReconcileError::MissingSignature)?;
        provider.verify(raw, signature)?;

        let event = provider.parse(raw)?;
        debug!(event_type = event.name(), "Webhook verified");

        match event {
            PaymentEvent::Paid(paid) => self.mark_paid(kind, paid).await,
            PaymentEvent::Confirmed { job_id: Some(job_id) } => {
                self.confirm_pending(&job_id, kind).await
            }
            PaymentEvent::Confirmed { job_id: None } => Ok(ReconcileOutcome::NoOp {
                reason: "confirmation without job id".into(),
            }),
            PaymentEvent::Expired { job_id: Some(job_id) } => self.mark_expired(&job_id).await,
            PaymentEvent::Expired { job_id: None } => {
                debug!("Expiry without job id");
                Ok(ReconcileOutcome::NoOp {
                    reason: "expiry without job id".into(),
                })
            }
            PaymentEvent::Ignored { event_type } => {
                info!(event_type = %event_type, "Unhandled webhook event type");
                Ok(ReconcileOutcome::NoOp {
                    reason: format!("unhandled event type {}", event_type),
                })
            }
        }
    }

    /// Record a completed payment and mark the job paid.
    pub async fn mark_paid(
        &self,
        kind: ProviderKind,
        paid: PaidEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let job_id = paid.job_id.clone();
        let metadata =
            NewPayment::metadata_with(kind, paid.provider_payment_id.as_deref(), paid.extra);
        let ledger = self
            .ledger
            .record_completed(NewPayment {
                job_id: paid.job_id,
                email: paid.email,
                amount: paid.amount,
                currency: paid.currency,
                provider: kind,
                provider_payment_id: paid.provider_payment_id,
                metadata,
            })
            .await?;

        let job_updated = self.set_paid(&job_id).await?;
        info!(%job_id, ?ledger, job_updated, "Payment recorded");
        Ok(ReconcileOutcome::Paid {
            job_id,
            ledger,
            job_updated,
        })
    }

    /// Settle pending rows for the job; marks it paid when anything settled.
    pub async fn confirm_pending(
        &self,
        job_id: &JobId,
        kind: ProviderKind,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let upgraded = self.ledger.confirm_pending(job_id, kind).await?;
        if upgraded > 0 {
            self.set_paid(job_id).await?;
            info!(%job_id, upgraded, "Pending payment confirmed");
        } else {
            debug!(%job_id, "No pending payment to confirm");
        }
        Ok(ReconcileOutcome::Confirmed {
            job_id: job_id.clone(),
            upgraded,
        })
    }

    /// Fail the job as expired unless it has been paid.
    pub async fn mark_expired(&self, job_id: &JobId) -> Result<ReconcileOutcome, ReconcileError> {
        if self.ledger.has_completed(job_id).await? {
            info!(%job_id, "Expiry ignored, job already paid");
            return Ok(ReconcileOutcome::Expired {
                job_id: job_id.clone(),
                applied: false,
            });
        }

        let applied = match self.jobs.expire(job_id).await {
            Ok(transition) => transition.is_applied(),
            Err(Error::JobNotFound(_)) => {
                warn!(%job_id, "Expiry for unknown job");
                false
            }
            Err(e) => return Err(e.into()),
        };
        if applied {
            info!(%job_id, "Job expired");
        }
        Ok(ReconcileOutcome::Expired {
            job_id: job_id.clone(),
            applied,
        })
    }

    async fn set_paid(&self, job_id: &JobId) -> Result<bool, ReconcileError> {
        match self.jobs.mark_paid(job_id, Utc::now()).await {
            Ok(Transition::Rejected(reason)) => {
                warn!(%job_id, %reason, "Payment not applied to job");
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(Error::JobNotFound(_)) => {
                warn!(%job_id, "Payment for unknown job");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerly_db::{MemoryJobStore, MemoryPaymentLedger};

    use crate::stripe::StripeProvider;

    #[tokio::test]
    async fn test_missing_signature_is_rejected_before_parsing() {
        let reconciler = PaymentReconciler::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryPaymentLedger::new()),
        )
        .with_provider(Arc::new(StripeProvider::new("s")));
        let err = reconciler
            .handle_webhook(ProviderKind::Stripe, b"not json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingSignature));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let reconciler = PaymentReconciler::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryPaymentLedger::new()),
        );
        let err = reconciler
            .handle_webhook(ProviderKind::Xendit, b"{}", Some("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownProvider(_)));
    }
}
