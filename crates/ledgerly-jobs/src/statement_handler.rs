//! Extract-then-structure handler for uploaded statements.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ledgerly_core::FailureReason;
use ledgerly_inference::StatementStructurer;

use crate::extraction::ExtractionRegistry;
use crate::handler::{JobContext, JobHandler, JobResult};

pub struct StatementJobHandler {
    registry: Arc<ExtractionRegistry>,
    structurer: Arc<StatementStructurer>,
}

impl StatementJobHandler {
    pub fn new(registry: Arc<ExtractionRegistry>, structurer: Arc<StatementStructurer>) -> Self {
        Self {
            registry,
            structurer,
        }
    }
}

#[async_trait]
impl JobHandler for StatementJobHandler {
    fn name(&self) -> &str {
        "statement"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let message = ctx.message();
        let file_type = message.file_type;

        if !message.verify_integrity() {
            warn!(job_id = %message.job_id, "Payload hash mismatch, processing anyway");
        }

        ctx.report_progress(10, Some("extracting"));
        let document = match self.registry.extract(file_type, &message.file_bytes).await {
            Ok(doc) => doc,
            Err(e) if !e.is_retryable() => {
                warn!(job_id = %message.job_id, error = %e, "Document cannot be read");
                return JobResult::Failed(FailureReason::unsupported_format(e.to_string()));
            }
            Err(e) => {
                warn!(job_id = %message.job_id, error = %e, "Extraction failed");
                return JobResult::Retry(e.to_string());
            }
        };
        debug!(
            job_id = %message.job_id,
            empty = document.content.is_empty(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document extracted"
        );

        ctx.report_progress(50, Some("structuring"));
        let preview = self.structurer.structure(&document.content, file_type).await;

        ctx.report_progress(100, Some("done"));
        info!(
            job_id = %message.job_id,
            file_type = %file_type,
            row_count = preview.row_count(),
            confidence = preview.confidence_score,
            duration_ms = start.elapsed().as_millis() as u64,
            "Statement processed"
        );
        JobResult::Success(preview)
    }
}
