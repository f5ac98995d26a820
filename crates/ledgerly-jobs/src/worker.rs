//! Queue consumer that drives jobs through extraction and structuring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use ledgerly_core::defaults::{
    PROCESSING_TIMEOUT_SECS, QUEUE_LEASE_SECS, WORKER_CONCURRENCY, WORKER_EVENT_CAPACITY,
    WORKER_POLL_INTERVAL_MS,
};
use ledgerly_core::{
    Delivery, Error, FailureReason, JobId, JobStore, QueueClient, Result, Transition,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::retry::RetryPolicy;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Wall-clock bound for one job execution.
    pub job_timeout_secs: u64,
    /// Visibility lease taken on each claim.
    pub lease_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            max_concurrent_jobs: WORKER_CONCURRENCY,
            enabled: true,
            job_timeout_secs: PROCESSING_TIMEOUT_SECS,
            lease_secs: QUEUE_LEASE_SECS,
        }
    }
}

/// Lease for a given execution bound, kept well above it.
fn lease_for(job_timeout_secs: u64) -> u64 {
    QUEUE_LEASE_SECS.max(job_timeout_secs.saturating_mul(2))
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable statement processing |
    /// | `WORKER_CONCURRENCY` | `5` | Max concurrent jobs |
    /// | `WORKER_POLL_INTERVAL_MS` | `500` | Polling interval when the queue is empty |
    /// | `PROCESSING_TIMEOUT` | `60` | Seconds allowed per job execution |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_CONCURRENCY)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WORKER_POLL_INTERVAL_MS);

        let job_timeout_secs = std::env::var("PROCESSING_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(PROCESSING_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            job_timeout_secs,
            lease_secs: lease_for(job_timeout_secs),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Also raises the lease so a running job is never redelivered.
    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self.lease_secs = lease_for(secs);
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted { job_id: JobId, attempt: u32 },
    JobProgress {
        job_id: JobId,
        percent: i32,
        message: Option<String>,
    },
    JobCompleted { job_id: JobId, confidence: f64 },
    /// Transient failure; another delivery is scheduled.
    JobRetrying {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    JobFailed { job_id: JobId, error: String },
    /// Message dropped because the job had already reached a terminal failure.
    JobSkipped { job_id: JobId },
    WorkerStarted,
    WorkerStopped,
}

impl WorkerEvent {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            WorkerEvent::JobStarted { job_id, .. }
            | WorkerEvent::JobProgress { job_id, .. }
            | WorkerEvent::JobCompleted { job_id, .. }
            | WorkerEvent::JobRetrying { job_id, .. }
            | WorkerEvent::JobFailed { job_id, .. }
            | WorkerEvent::JobSkipped { job_id } => Some(job_id),
            WorkerEvent::WorkerStarted | WorkerEvent::WorkerStopped => None,
        }
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Signal the worker to stop and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) -> Result<()> {
        // A closed channel means the loop already exited.
        let _ = self.shutdown_tx.send(()).await;

        if let Some(task) = self.task.lock().await.take() {
            task.await
                .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes statements from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn QueueClient>,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn QueueClient>,
        handler: Arc<dyn JobHandler>,
        retry: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(WORKER_EVENT_CAPACITY);
        Self {
            jobs,
            queue,
            handler,
            retry,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        let task = tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Keeps up to `max_concurrent_jobs` deliveries in flight, refilling a
    /// slot as soon as its task finishes. In-flight jobs are drained on shutdown.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Statement worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            handler = self.handler.name(),
            "Statement worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let lease = Duration::from_secs(self.config.lease_secs);

        let mut tasks = JoinSet::new();
        loop {
            let mut claimed = 0usize;
            while tasks.len() < self.config.max_concurrent_jobs {
                match self.queue.claim(lease).await {
                    Ok(Some(delivery)) => {
                        let worker = self.clone_refs();
                        tasks.spawn(async move { worker.execute_job(delivery).await });
                        claimed += 1;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to claim message");
                        break;
                    }
                }
            }
            if claimed > 0 {
                debug!(claimed, in_flight = tasks.len(), "Claimed deliveries");
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Statement worker received shutdown signal");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_task_result(result);
                }
                _ = sleep(poll_interval) => {}
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight jobs");
        }
        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Statement worker stopped");
    }

    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            jobs: Arc::clone(&self.jobs),
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            retry: self.retry,
            job_timeout: Duration::from_secs(self.config.job_timeout_secs),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Subscribe before `start()` to observe every event.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

fn log_task_result(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = ?e, "Job task panicked");
    }
}

/// Owned references for executing a single delivery in a spawned task.
struct JobWorkerRef {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn QueueClient>,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    job_timeout: Duration,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorkerRef {
    async fn execute_job(self, delivery: Delivery) {
        let start = Instant::now();
        let job_id = delivery.message.job_id.clone();
        let attempt = delivery.attempt;

        // Lease expiries can redeliver past the bound.
        if attempt > delivery.max_attempts {
            self.exhaust(&job_id, attempt, "lease expired on final attempt")
                .await;
            return;
        }

        match self.jobs.mark_processing(&job_id).await {
            Ok(Transition::Rejected(reason)) => {
                info!(%job_id, %reason, "Job already failed, dropping message");
                self.settle(self.queue.ack(&job_id).await, &job_id);
                let _ = self.event_tx.send(WorkerEvent::JobSkipped { job_id });
                return;
            }
            Ok(_) => {}
            Err(Error::JobNotFound(_)) => {
                warn!(%job_id, "No job record for message, discarding");
                self.settle(self.queue.dead(&job_id, "job record missing").await, &job_id);
                return;
            }
            Err(e) => {
                error!(%job_id, error = %e, "Failed to mark job processing");
                self.retry_or_exhaust(&job_id, attempt, delivery.max_attempts, e.to_string())
                    .await;
                return;
            }
        }

        info!(%job_id, attempt, file_type = %delivery.message.file_type, "Processing statement");
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id: job_id.clone(),
            attempt,
        });

        let max_attempts = delivery.max_attempts;
        let event_tx = self.event_tx.clone();
        let progress_id = job_id.clone();
        let ctx = JobContext::new(delivery).with_progress_callback(move |percent, message| {
            let _ = event_tx.send(WorkerEvent::JobProgress {
                job_id: progress_id.clone(),
                percent,
                message: message.map(String::from),
            });
        });

        let result = match tokio::time::timeout(self.job_timeout, self.handler.execute(ctx)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(%job_id, attempt, "Job exceeded timeout of {}s", self.job_timeout.as_secs());
                JobResult::Retry(format!(
                    "Job exceeded timeout of {}s",
                    self.job_timeout.as_secs()
                ))
            }
        };

        match result {
            JobResult::Success(preview) => {
                let confidence = preview.confidence_score;
                match self.jobs.complete(&job_id, preview).await {
                    Ok(Transition::Rejected(reason)) => {
                        warn!(%job_id, %reason, "Job failed while processing, result discarded");
                        self.settle(self.queue.ack(&job_id).await, &job_id);
                    }
                    Ok(_) => {
                        self.settle(self.queue.ack(&job_id).await, &job_id);
                        info!(
                            %job_id,
                            confidence,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Job completed"
                        );
                        let _ = self
                            .event_tx
                            .send(WorkerEvent::JobCompleted { job_id, confidence });
                    }
                    Err(e) => {
                        error!(%job_id, error = %e, "Failed to store preview");
                        self.retry_or_exhaust(&job_id, attempt, max_attempts, e.to_string())
                            .await;
                    }
                }
            }
            JobResult::Failed(reason) => {
                self.fail(&job_id, reason).await;
            }
            JobResult::Retry(err) => {
                self.retry_or_exhaust(&job_id, attempt, max_attempts, err)
                    .await;
            }
        }
    }

    async fn retry_or_exhaust(&self, job_id: &JobId, attempt: u32, max_attempts: u32, err: String) {
        if attempt >= max_attempts {
            self.exhaust(job_id, attempt, &err).await;
            return;
        }

        let delay = self.retry.delay_after(attempt);
        warn!(
            %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Job attempt failed, scheduling retry"
        );
        self.settle(self.queue.retry(job_id, delay, &err).await, job_id);
        let _ = self.event_tx.send(WorkerEvent::JobRetrying {
            job_id: job_id.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: err,
        });
    }

    async fn exhaust(&self, job_id: &JobId, attempt: u32, err: &str) {
        let reason =
            FailureReason::retries_exhausted(format!("Gave up after {} attempts: {}", attempt, err));
        self.fail(job_id, reason).await;
    }

    async fn fail(&self, job_id: &JobId, reason: FailureReason) {
        match self.jobs.fail(job_id, reason.clone()).await {
            Ok(Transition::Rejected(why)) => {
                debug!(%job_id, %why, "Failure not recorded");
            }
            Ok(_) => {}
            Err(e) => error!(%job_id, error = %e, "Failed to mark job failed"),
        }
        self.settle(self.queue.dead(job_id, &reason.message).await, job_id);
        warn!(%job_id, code = reason.code.as_str(), error = %reason.message, "Job failed");
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id: job_id.clone(),
            error: reason.message,
        });
    }

    fn settle(&self, result: Result<()>, job_id: &JobId) {
        if let Err(e) = result {
            error!(%job_id, error = %e, "Queue bookkeeping failed");
        }
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn QueueClient>,
    handler: Option<Arc<dyn JobHandler>>,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn QueueClient>) -> Self {
        Self {
            jobs,
            queue,
            handler: None,
            retry: RetryPolicy::default(),
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<JobWorker> {
        let handler = self
            .handler
            .ok_or_else(|| Error::Config("Worker requires a job handler".into()))?;
        Ok(JobWorker::new(
            self.jobs,
            self.queue,
            handler,
            self.retry,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, WORKER_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, WORKER_CONCURRENCY);
        assert!(config.enabled);
        assert!(config.lease_secs > config.job_timeout_secs);
    }

    #[test]
    fn test_worker_config_chaining() {
        let config = WorkerConfig::default()
            .with_poll_interval(10)
            .with_max_concurrent(0)
            .with_enabled(false)
            .with_job_timeout_secs(2);
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(!config.enabled);
        assert_eq!(config.job_timeout_secs, 2);
        assert_eq!(config.lease_secs, QUEUE_LEASE_SECS);
    }

    #[test]
    fn test_lease_stays_above_job_timeout() {
        let config = WorkerConfig::default().with_job_timeout_secs(QUEUE_LEASE_SECS);
        assert!(config.lease_secs > config.job_timeout_secs);

        let config = WorkerConfig::default().with_job_timeout_secs(u64::MAX);
        assert_eq!(config.lease_secs, u64::MAX);
    }

    #[test]
    fn test_event_job_id() {
        let id = JobId::parse("abc").unwrap();
        let event = WorkerEvent::JobSkipped { job_id: id.clone() };
        assert_eq!(event.job_id(), Some(&id));
        assert_eq!(WorkerEvent::WorkerStarted.job_id(), None);
    }

    #[test]
    fn test_builder_requires_handler() {
        let jobs = Arc::new(ledgerly_db::MemoryJobStore::new());
        let queue = Arc::new(ledgerly_db::MemoryQueue::new());
        let result = WorkerBuilder::new(jobs, queue).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
