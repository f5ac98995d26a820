//! Payment-gated download of converted statements.
//!
//! The workbook is rebuilt from the stored preview on every authorized
//! request; nothing is cached between downloads.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use ledgerly_core::{Error, JobId, JobStatus, JobStore, PaymentLedger, Result};

use crate::services::export::{export_filename, render_xlsx};

/// Why a download was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    NotCompleted(JobStatus),
    Unpaid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Authorized(ExportedFile),
    Denied {
        reason: DenialReason,
        /// Relative path where the buyer can pay for this job.
        unlock_path: String,
    },
}

/// Where to send a buyer to unlock a job.
pub fn unlock_path(job_id: &JobId) -> String {
    format!("/checkout?jobId={}", job_id)
}

pub struct DeliveryGate {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn PaymentLedger>,
}

impl DeliveryGate {
    pub fn new(jobs: Arc<dyn JobStore>, ledger: Arc<dyn PaymentLedger>) -> Self {
        Self { jobs, ledger }
    }

    /// Authorize a download. Unknown jobs are `Error::JobNotFound`.
    ///
    /// A job is paid when the job record carries a payment time or the
    /// ledger holds a completed payment for it.
    #[instrument(skip(self), fields(subsystem = "api", component = "delivery_gate"))]
    pub async fn authorize(&self, job_id: &JobId) -> Result<GateDecision> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        let preview = match job.state.preview() {
            Some(preview) => preview,
            None => {
                debug!(status = job.status().as_str(), "Download denied, job not completed");
                return Ok(GateDecision::Denied {
                    reason: DenialReason::NotCompleted(job.status()),
                    unlock_path: unlock_path(job_id),
                });
            }
        };

        if !job.is_paid() && !self.ledger.has_completed(job_id).await? {
            debug!("Download denied, job not paid");
            return Ok(GateDecision::Denied {
                reason: DenialReason::Unpaid,
                unlock_path: unlock_path(job_id),
            });
        }

        let bytes = render_xlsx(preview)?;
        info!(bytes = bytes.len(), rows = preview.row_count(), "Export generated");
        Ok(GateDecision::Authorized(ExportedFile {
            bytes,
            filename: export_filename(job_id),
        }))
    }
}
