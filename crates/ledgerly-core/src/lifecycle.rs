//! Job lifecycle: tagged state plus the pure transition function every
//! store implementation applies.
//!
//! Worker events and payment events can race on the same job. Stores load the
//! current row, call [`Job::apply`], and persist the result under a row lock,
//! so the table below is the only place ordering rules live.
//!
//! | Event \ State   | Uploaded    | Processing  | Completed         | Failed                          |
//! |-----------------|-------------|-------------|-------------------|---------------------------------|
//! | StartProcessing | Processing  | unchanged   | unchanged         | rejected                        |
//! | Complete        | Completed   | Completed   | Completed (new)   | rejected                        |
//! | Fail            | Failed      | Failed      | rejected          | unchanged                       |
//! | Paid            | paid flag   | paid flag   | paid flag         | paid flag, revives if expired   |
//! | Expire          | Failed      | Failed      | Failed (stale)    | unchanged                       |
//!
//! `Expire` is a no-op on a paid job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FailureCode, FailureReason, FileType, JobId, PreviewData};
use crate::{Error, Result};

/// Coarse status, as exposed to clients and stored in the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(JobStatus::Uploaded),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Status and payload as one value; a completed job always carries a preview.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Uploaded,
    Processing,
    Completed {
        preview: PreviewData,
    },
    Failed {
        reason: FailureReason,
        /// Preview computed before the failure. Not to be served.
        stale_preview: Option<PreviewData>,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Uploaded => JobStatus::Uploaded,
            JobState::Processing => JobStatus::Processing,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }

    /// The servable preview. `None` for anything but `Completed`.
    pub fn preview(&self) -> Option<&PreviewData> {
        match self {
            JobState::Completed { preview } => Some(preview),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            JobState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Any stored preview, servable or stale. Used for persistence only.
    pub fn stored_preview(&self) -> Option<&PreviewData> {
        match self {
            JobState::Completed { preview } => Some(preview),
            JobState::Failed { stale_preview, .. } => stale_preview.as_ref(),
            _ => None,
        }
    }

    /// Rebuild a state from its stored columns.
    pub fn from_columns(
        status: JobStatus,
        preview: Option<PreviewData>,
        failure: Option<FailureReason>,
    ) -> Result<Self> {
        match status {
            JobStatus::Uploaded => Ok(JobState::Uploaded),
            JobStatus::Processing => Ok(JobState::Processing),
            JobStatus::Completed => preview
                .map(|preview| JobState::Completed { preview })
                .ok_or_else(|| Error::Internal("completed job has no preview data".into())),
            JobStatus::Failed => Ok(JobState::Failed {
                reason: failure.unwrap_or_else(|| {
                    FailureReason::retries_exhausted("failure reason not recorded")
                }),
                stale_preview: preview,
            }),
        }
    }
}

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    StartProcessing,
    Complete(PreviewData),
    Fail(FailureReason),
    Paid(DateTime<Utc>),
    Expire,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::StartProcessing => "start_processing",
            JobEvent::Complete(_) => "complete",
            JobEvent::Fail(_) => "fail",
            JobEvent::Paid(_) => "paid",
            JobEvent::Expire => "expire",
        }
    }
}

/// Result of applying an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job changed; persist the new value.
    Applied(Job),
    /// The event is valid but has no effect.
    Unchanged,
    /// The event is not allowed in the current state.
    Rejected(String),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// A conversion job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub job_id: JobId,
    pub file_type: FileType,
    pub state: JobState,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly uploaded job.
    pub fn new(job_id: JobId, file_type: FileType, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            file_type,
            state: JobState::Uploaded,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Confidence of the servable preview, if any.
    pub fn confidence_score(&self) -> Option<f64> {
        self.state.preview().map(|p| p.confidence_score)
    }

    /// Apply an event without side effects.
    pub fn apply(&self, event: JobEvent, now: DateTime<Utc>) -> Transition {
        let next_state = match (&self.state, event) {
            (JobState::Failed { .. }, JobEvent::StartProcessing) => {
                return Transition::Rejected("job already failed".into())
            }
            (JobState::Uploaded, JobEvent::StartProcessing) => JobState::Processing,
            (_, JobEvent::StartProcessing) => return Transition::Unchanged,

            (JobState::Failed { .. }, JobEvent::Complete(_)) => {
                return Transition::Rejected("cannot complete a failed job".into())
            }
            (_, JobEvent::Complete(preview)) => JobState::Completed { preview },

            (JobState::Completed { .. }, JobEvent::Fail(_)) => {
                return Transition::Rejected("cannot fail a completed job".into())
            }
            (JobState::Failed { .. }, JobEvent::Fail(_)) => return Transition::Unchanged,
            (_, JobEvent::Fail(reason)) => JobState::Failed {
                reason,
                stale_preview: None,
            },

            (_, JobEvent::Paid(_)) if self.is_paid() => return Transition::Unchanged,
            (
                JobState::Failed {
                    reason,
                    stale_preview: Some(preview),
                },
                JobEvent::Paid(at),
            ) if reason.code == FailureCode::PaymentExpired => {
                return Transition::Applied(Job {
                    state: JobState::Completed {
                        preview: preview.clone(),
                    },
                    paid_at: Some(at),
                    updated_at: now,
                    ..self.clone()
                });
            }
            (state, JobEvent::Paid(at)) => {
                return Transition::Applied(Job {
                    state: state.clone(),
                    paid_at: Some(at),
                    updated_at: now,
                    ..self.clone()
                });
            }

            (_, JobEvent::Expire) if self.is_paid() => return Transition::Unchanged,
            (JobState::Failed { .. }, JobEvent::Expire) => return Transition::Unchanged,
            (JobState::Completed { preview }, JobEvent::Expire) => JobState::Failed {
                reason: FailureReason::payment_expired(),
                stale_preview: Some(preview.clone()),
            },
            (_, JobEvent::Expire) => JobState::Failed {
                reason: FailureReason::payment_expired(),
                stale_preview: None,
            },
        };

        Transition::Applied(Job {
            state: next_state,
            updated_at: now,
            ..self.clone()
        })
    }
}
