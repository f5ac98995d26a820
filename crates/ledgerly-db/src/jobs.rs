//! Job store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use ledgerly_core::{
    Error, FailureCode, FailureReason, FileType, Job, JobEvent, JobId, JobState, JobStatus,
    JobStore, PreviewData, Result, Transition,
};

const JOB_COLUMNS: &str = "job_id, file_type, status, preview_data, failure_code, \
                           failure_message, paid_at, created_at, updated_at";

/// PostgreSQL implementation of JobStore.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: &PgRow) -> Result<Job> {
        let job_id: String = row.get("job_id");
        let file_type: String = row.get("file_type");
        let status: String = row.get("status");
        let preview: Option<JsonValue> = row.get("preview_data");
        let failure_code: Option<String> = row.get("failure_code");
        let failure_message: Option<String> = row.get("failure_message");

        let file_type = FileType::from_db(&file_type)
            .ok_or_else(|| Error::Internal(format!("unknown file type in store: {file_type}")))?;
        let status = JobStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("unknown job status in store: {status}")))?;
        let preview = preview
            .map(serde_json::from_value::<PreviewData>)
            .transpose()?;
        let failure = failure_code
            .as_deref()
            .and_then(FailureCode::parse)
            .map(|code| FailureReason {
                code,
                message: failure_message.unwrap_or_default(),
            });

        Ok(Job {
            job_id: JobId::parse(&job_id)?,
            file_type,
            state: JobState::from_columns(status, preview, failure)?,
            paid_at: row.get::<Option<DateTime<Utc>>, _>("paid_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl JobStore for PgJobRepository {
    async fn create(&self, job_id: &JobId, file_type: FileType) -> Result<Job> {
        let job = Job::new(job_id.clone(), file_type, Utc::now());

        sqlx::query(
            "INSERT INTO processing_jobs (job_id, file_type, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(job.job_id.as_str())
        .bind(file_type.as_str())
        .bind(job.status().as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(subsystem = "db", component = "jobs", job_id = %job_id, "Job created");
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE job_id = $1"
        ))
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn transition(&self, job_id: &JobId, event: JobEvent) -> Result<Transition> {
        let event_name = event.name();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock serializes worker and payment events on the same job.
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let current = match row {
            Some(row) => Self::parse_job_row(&row)?,
            None => return Err(Error::JobNotFound(job_id.to_string())),
        };

        let transition = current.apply(event, Utc::now());

        if let Transition::Applied(ref next) = transition {
            let preview_json = next
                .state
                .stored_preview()
                .map(serde_json::to_value)
                .transpose()?;
            let failure = next.state.failure();

            sqlx::query(
                "UPDATE processing_jobs
                 SET status = $2, preview_data = $3, confidence_score = $4,
                     failure_code = $5, failure_message = $6, paid_at = $7, updated_at = $8
                 WHERE job_id = $1",
            )
            .bind(job_id.as_str())
            .bind(next.status().as_str())
            .bind(preview_json)
            .bind(next.confidence_score())
            .bind(failure.map(|f| f.code.as_str()))
            .bind(failure.map(|f| f.message.as_str()))
            .bind(next.paid_at)
            .bind(next.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "jobs",
            job_id = %job_id,
            event = event_name,
            applied = transition.is_applied(),
            "Job transition"
        );
        Ok(transition)
    }
}
