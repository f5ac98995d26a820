//! In-process implementations of the store and queue traits.
//!
//! Used by tests and by `STORE_BACKEND=memory` for local runs without
//! PostgreSQL. Semantics match the PostgreSQL implementations, including the
//! shared transition function and the one-completed-payment rule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use ledgerly_core::{
    Delivery, Error, FileType, Job, JobEvent, JobId, JobStore, NewPayment, Payment,
    PaymentLedger, PaymentStatus, ProviderKind, QueueClient, QueueMessage, RecordOutcome, Result,
    Transition,
};

// =============================================================================
// JOB STORE
// =============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: &JobId, file_type: FileType) -> Result<Job> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(job_id) {
            return Err(Error::InvalidInput(format!("job {job_id} already exists")));
        }
        let job = Job::new(job_id.clone(), file_type, Utc::now());
        jobs.insert(job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn transition(&self, job_id: &JobId, event: JobEvent) -> Result<Transition> {
        let mut jobs = self.jobs.lock().await;
        let current = jobs
            .get(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        let transition = current.apply(event, Utc::now());
        if let Transition::Applied(ref next) = transition {
            jobs.insert(job_id.clone(), next.clone());
        }
        Ok(transition)
    }
}

// =============================================================================
// PAYMENT LEDGER
// =============================================================================

#[derive(Default)]
pub struct MemoryPaymentLedger {
    payments: Mutex<Vec<Payment>>,
}

impl MemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(payment: NewPayment, status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::now_v7(),
            job_id: payment.job_id,
            email: payment.email,
            amount: payment.amount,
            currency: payment.currency,
            provider: payment.provider,
            status,
            provider_payment_id: payment.provider_payment_id,
            metadata: payment.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl PaymentLedger for MemoryPaymentLedger {
    async fn record_pending(&self, payment: NewPayment) -> Result<Payment> {
        let record = Self::build(payment, PaymentStatus::Pending);
        self.payments.lock().await.push(record.clone());
        Ok(record)
    }

    async fn record_completed(&self, payment: NewPayment) -> Result<RecordOutcome> {
        let mut payments = self.payments.lock().await;
        let same_key = |p: &Payment| p.job_id == payment.job_id && p.provider == payment.provider;

        if payments
            .iter()
            .any(|p| same_key(p) && p.status == PaymentStatus::Completed)
        {
            return Ok(RecordOutcome::AlreadyCompleted);
        }

        if let Some(pending) = payments
            .iter_mut()
            .find(|p| same_key(p) && p.status == PaymentStatus::Pending)
        {
            pending.status = PaymentStatus::Completed;
            if payment.email.is_some() {
                pending.email = payment.email;
            }
            pending.amount = payment.amount;
            pending.currency = payment.currency;
            if payment.provider_payment_id.is_some() {
                pending.provider_payment_id = payment.provider_payment_id;
            }
            if let (Some(existing), serde_json::Value::Object(extra)) =
                (pending.metadata.as_object_mut(), payment.metadata)
            {
                existing.extend(extra);
            }
            pending.updated_at = Utc::now();
            return Ok(RecordOutcome::Upgraded);
        }

        payments.push(Self::build(payment, PaymentStatus::Completed));
        Ok(RecordOutcome::Inserted)
    }

    async fn confirm_pending(&self, job_id: &JobId, provider: ProviderKind) -> Result<u64> {
        let mut payments = self.payments.lock().await;
        let same_key = |p: &Payment| &p.job_id == job_id && p.provider == provider;

        if payments
            .iter()
            .any(|p| same_key(p) && p.status == PaymentStatus::Completed)
        {
            return Ok(0);
        }
        match payments
            .iter_mut()
            .find(|p| same_key(p) && p.status == PaymentStatus::Pending)
        {
            Some(pending) => {
                pending.status = PaymentStatus::Completed;
                pending.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn has_completed(&self, job_id: &JobId) -> Result<bool> {
        Ok(self
            .payments
            .lock()
            .await
            .iter()
            .any(|p| &p.job_id == job_id && p.status == PaymentStatus::Completed))
    }

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .lock()
            .await
            .iter()
            .filter(|p| &p.job_id == job_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Delivery state of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    InFlight,
    /// Retries exhausted. The file bytes are dropped; metadata stays.
    Dead,
}

struct Entry {
    message: QueueMessage,
    state: EntryState,
    attempts: u32,
    max_attempts: u32,
    available_at: Instant,
    locked_until: Option<Instant>,
    last_error: Option<String>,
    seq: u64,
}

impl Entry {
    fn claimable(&self, now: Instant) -> bool {
        match self.state {
            EntryState::Pending => self.available_at <= now,
            EntryState::InFlight => self.locked_until.is_some_and(|until| until < now),
            EntryState::Dead => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<HashMap<JobId, Entry>>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current delivery state of a job's message.
    pub async fn state_of(&self, job_id: &JobId) -> Option<EntryState> {
        self.entries.lock().await.get(job_id).map(|e| e.state)
    }

    /// Deliveries made so far for a job's message.
    pub async fn attempts_of(&self, job_id: &JobId) -> Option<u32> {
        self.entries.lock().await.get(job_id).map(|e| e.attempts)
    }

    /// Size of the file bytes still held for a job's message.
    pub async fn payload_len_of(&self, job_id: &JobId) -> Option<usize> {
        self.entries
            .lock()
            .await
            .get(job_id)
            .map(|e| e.message.file_bytes.len())
    }

    /// Last error recorded by `retry` or `dead`.
    pub async fn last_error_of(&self, job_id: &JobId) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(job_id)
            .and_then(|e| e.last_error.clone())
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn enqueue(&self, message: QueueMessage, max_attempts: u32) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Queue("queue is closed".into()));
        }
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&message.job_id) {
            return Err(Error::Queue(format!(
                "job {} is already queued",
                message.job_id
            )));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            message.job_id.clone(),
            Entry {
                message,
                state: EntryState::Pending,
                attempts: 0,
                max_attempts: max_attempts.max(1),
                available_at: Instant::now(),
                locked_until: None,
                last_error: None,
                seq,
            },
        );
        Ok(())
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Delivery>> {
        let now = Instant::now();
        let locked_until = now
            .checked_add(lease)
            .ok_or_else(|| Error::Queue("lease out of range".into()))?;
        let mut entries = self.entries.lock().await;
        let next = entries
            .values_mut()
            .filter(|e| e.claimable(now))
            .min_by_key(|e| (e.available_at, e.seq));

        Ok(next.map(|entry| {
            entry.state = EntryState::InFlight;
            entry.attempts += 1;
            entry.locked_until = Some(locked_until);
            Delivery {
                message: entry.message.clone(),
                attempt: entry.attempts,
                max_attempts: entry.max_attempts,
            }
        }))
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        self.entries.lock().await.remove(job_id);
        Ok(())
    }

    async fn retry(&self, job_id: &JobId, delay: Duration, error: &str) -> Result<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(job_id) {
            entry.state = EntryState::Pending;
            entry.available_at = Instant::now() + delay;
            entry.locked_until = None;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn dead(&self, job_id: &JobId, error: &str) -> Result<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(job_id) {
            entry.state = EntryState::Dead;
            entry.locked_until = None;
            entry.last_error = Some(error.to_string());
            entry.message.file_bytes = Vec::new();
        }
        Ok(())
    }

    async fn position(&self, job_id: &JobId) -> Result<Option<u64>> {
        let entries = self.entries.lock().await;
        let Some(me) = entries.get(job_id).filter(|e| e.state == EntryState::Pending) else {
            return Ok(None);
        };
        let ahead = entries
            .values()
            .filter(|e| e.state == EntryState::Pending && e.seq < me.seq)
            .count() as u64;
        Ok(Some(ahead + 1))
    }

    async fn pending_count(&self) -> Result<u64> {
        Ok(self
            .entries
            .lock()
            .await
            .values()
            .filter(|e| matches!(e.state, EntryState::Pending | EntryState::InFlight))
            .count() as u64)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
