//! Job handler contract used by the worker.

use async_trait::async_trait;

use ledgerly_core::{Delivery, FailureReason, JobId, PreviewData, QueueMessage};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed queue delivery.
    pub delivery: Delivery,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.delivery.message.job_id
    }

    pub fn message(&self) -> &QueueMessage {
        &self.delivery.message
    }

    pub fn attempt(&self) -> u32 {
        self.delivery.attempt
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Preview produced; the job completes.
    Success(PreviewData),
    /// Permanent failure; the job fails without further attempts.
    Failed(FailureReason),
    /// Transient failure; redeliver if attempts remain.
    Retry(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: JobContext) -> JobResult;
}
