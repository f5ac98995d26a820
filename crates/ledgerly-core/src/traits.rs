//! Trait seams between ledgerly components.
//!
//! Stores and the queue are injected as `Arc<dyn Trait>` so the worker, the
//! reconciler and the HTTP layer never depend on a concrete backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::lifecycle::{Job, JobEvent, Transition};
use crate::models::{
    Delivery, ExtractedDocument, FailureReason, FileType, JobId, NewPayment, Payment,
    PreviewData, ProviderKind, QueueMessage, RecordOutcome,
};
use crate::{Error, Result};

// =============================================================================
// JOB STORE
// =============================================================================

/// Persistent record of each job; the single source of truth for status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in the `uploaded` state.
    async fn create(&self, job_id: &JobId, file_type: FileType) -> Result<Job>;

    /// Fetch a job by id.
    async fn get(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Atomically load the job, apply `event` and persist the result.
    ///
    /// Returns `Error::JobNotFound` for unknown ids.
    async fn transition(&self, job_id: &JobId, event: JobEvent) -> Result<Transition>;

    async fn mark_processing(&self, job_id: &JobId) -> Result<Transition> {
        self.transition(job_id, JobEvent::StartProcessing).await
    }

    async fn complete(&self, job_id: &JobId, preview: PreviewData) -> Result<Transition> {
        self.transition(job_id, JobEvent::Complete(preview)).await
    }

    async fn fail(&self, job_id: &JobId, reason: FailureReason) -> Result<Transition> {
        self.transition(job_id, JobEvent::Fail(reason)).await
    }

    async fn mark_paid(&self, job_id: &JobId, at: DateTime<Utc>) -> Result<Transition> {
        self.transition(job_id, JobEvent::Paid(at)).await
    }

    async fn expire(&self, job_id: &JobId) -> Result<Transition> {
        self.transition(job_id, JobEvent::Expire).await
    }
}

// =============================================================================
// PAYMENT LEDGER
// =============================================================================

/// Append-only payment records, at most one completed row per job and provider.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Record a checkout that has not been paid yet.
    async fn record_pending(&self, payment: NewPayment) -> Result<Payment>;

    /// Record a confirmed payment: insert, upgrade a pending row, or no-op.
    async fn record_completed(&self, payment: NewPayment) -> Result<RecordOutcome>;

    /// Upgrade pending rows for `(job_id, provider)`; returns rows changed.
    async fn confirm_pending(&self, job_id: &JobId, provider: ProviderKind) -> Result<u64>;

    /// Whether any completed payment exists for the job.
    async fn has_completed(&self, job_id: &JobId) -> Result<bool>;

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<Payment>>;
}

// =============================================================================
// PROCESSING QUEUE
// =============================================================================

/// Work queue between intake and the worker.
///
/// A message is `enqueued → in-flight → {acked, retried, dead}`. A claimed
/// message whose lease runs out becomes claimable again.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Add a message. One message per job id.
    async fn enqueue(&self, message: QueueMessage, max_attempts: u32) -> Result<()>;

    /// Claim the next available message for `lease`.
    async fn claim(&self, lease: Duration) -> Result<Option<Delivery>>;

    /// Processing finished; drop the message.
    async fn ack(&self, job_id: &JobId) -> Result<()>;

    /// Make the message available again after `delay`.
    async fn retry(&self, job_id: &JobId, delay: Duration, error: &str) -> Result<()>;

    /// Park the message permanently.
    async fn dead(&self, job_id: &JobId, error: &str) -> Result<()>;

    /// 1-based position among waiting messages, `None` when not waiting.
    async fn position(&self, job_id: &JobId) -> Result<Option<u64>>;

    /// Messages waiting or in flight.
    async fn pending_count(&self) -> Result<u64>;

    /// Stop accepting new messages.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Turns raw bytes of a known type into text or a table.
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    /// File types this adapter understands.
    fn file_types(&self) -> &'static [FileType];

    /// Extract content.
    ///
    /// `Error::UnsupportedFormat` means the bytes cannot be parsed at all;
    /// any other error is treated as transient.
    async fn extract(&self, data: &[u8]) -> Result<ExtractedDocument>;

    /// Human-readable name of this adapter.
    fn name(&self) -> &str;
}

// =============================================================================
// GENERATION
// =============================================================================

/// Opaque text generation backend used for structuring.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response for `prompt` under `system` instructions.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Check whether the backend is reachable.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn model_name(&self) -> &str;
}

/// Backend that always fails; used when no structuring key is configured so
/// every job takes the deterministic fallback.
pub struct UnavailableBackend;

#[async_trait]
impl GenerationBackend for UnavailableBackend {
    async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
        Err(Error::Inference("no structuring backend configured".into()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}
