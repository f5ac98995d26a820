//! PostgreSQL-backed processing queue.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several workers can poll the same
//! table. A claimed message carries a lease; if the worker dies the lease
//! expires and the message is handed out again with its attempt count intact.
//!
//! Acked rows are deleted. Dead rows keep their metadata and last error but
//! not the file bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres};
use tracing::{debug, warn};

use ledgerly_core::{Delivery, Error, JobId, QueueClient, QueueMessage, Result};

/// PostgreSQL implementation of QueueClient.
pub struct PgQueue {
    pool: Pool<Postgres>,
    closed: AtomicBool,
}

impl PgQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(delay)
        .map_err(|e| Error::Queue(format!("delay out of range: {e}")))?;
    Ok(now + delta)
}

#[async_trait]
impl QueueClient for PgQueue {
    async fn enqueue(&self, message: QueueMessage, max_attempts: u32) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Queue("queue is closed".into()));
        }

        let payload = serde_json::to_value(&message)?;
        let result = sqlx::query(
            "INSERT INTO statement_queue (job_id, payload, max_attempts, enqueued_at, available_at)
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(message.job_id.as_str())
        .bind(payload)
        .bind(max_attempts.max(1) as i32)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(
                    subsystem = "db",
                    component = "queue",
                    job_id = %message.job_id,
                    byte_len = message.file_bytes.len(),
                    "Message enqueued"
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Queue(
                format!("job {} is already queued", message.job_id),
            )),
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Delivery>> {
        let now = Utc::now();
        let locked_until = after(now, lease)?;

        let row: Option<(JsonValue, i32, i32)> = sqlx::query_as(
            "UPDATE statement_queue
             SET state = 'in_flight', attempts = attempts + 1,
                 locked_until = $2, updated_at = $1
             WHERE job_id = (
                 SELECT job_id FROM statement_queue
                 WHERE (state = 'pending' AND available_at <= $1)
                    OR (state = 'in_flight' AND locked_until < $1)
                 ORDER BY available_at ASC, enqueued_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING payload, attempts, max_attempts",
        )
        .bind(now)
        .bind(locked_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some((payload, attempts, max_attempts)) = row else {
            return Ok(None);
        };

        let message: QueueMessage = serde_json::from_value(payload)?;
        if !message.verify_integrity() {
            warn!(
                subsystem = "db",
                component = "queue",
                job_id = %message.job_id,
                "Queued payload does not match its content hash"
            );
        }

        Ok(Some(Delivery {
            message,
            attempt: attempts.max(0) as u32,
            max_attempts: max_attempts.max(1) as u32,
        }))
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        sqlx::query("DELETE FROM statement_queue WHERE job_id = $1")
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn retry(&self, job_id: &JobId, delay: Duration, error: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE statement_queue
             SET state = 'pending', available_at = $2, locked_until = NULL,
                 last_error = $3, updated_at = $4
             WHERE job_id = $1",
        )
        .bind(job_id.as_str())
        .bind(after(now, delay)?)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn dead(&self, job_id: &JobId, error: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE statement_queue
             SET state = 'dead', locked_until = NULL, last_error = $2, updated_at = $3,
                 payload = jsonb_set(payload, '{fileBytes}', '""'::jsonb)
             WHERE job_id = $1"#,
        )
        .bind(job_id.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn position(&self, job_id: &JobId) -> Result<Option<u64>> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT (
                 SELECT COUNT(*) FROM statement_queue q
                 WHERE q.state = 'pending'
                   AND (q.enqueued_at, q.job_id) <= (me.enqueued_at, me.job_id)
             )
             FROM statement_queue me
             WHERE me.job_id = $1 AND me.state = 'pending'",
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(position.map(|p| p.max(1) as u64))
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM statement_queue WHERE state IN ('pending', 'in_flight')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count.max(0) as u64)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
