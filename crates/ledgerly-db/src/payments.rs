//! Payment ledger implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use ledgerly_core::{
    Error, JobId, NewPayment, Payment, PaymentLedger, PaymentStatus, ProviderKind, RecordOutcome,
    Result,
};

const PAYMENT_COLUMNS: &str = "id, job_id, email, amount, currency, provider, status, \
                               provider_payment_id, metadata, created_at, updated_at";

/// PostgreSQL implementation of PaymentLedger.
pub struct PgPaymentRepository {
    pool: Pool<Postgres>,
}

impl PgPaymentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_payment_row(row: &PgRow) -> Result<Payment> {
        let job_id: String = row.get("job_id");
        let provider: String = row.get("provider");
        let status: String = row.get("status");

        Ok(Payment {
            id: row.get("id"),
            job_id: JobId::parse(&job_id)?,
            email: row.get("email"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            provider: ProviderKind::parse(&provider)
                .ok_or_else(|| Error::Internal(format!("unknown provider in ledger: {provider}")))?,
            status: PaymentStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("unknown payment status: {status}")))?,
            provider_payment_id: row.get("provider_payment_id"),
            metadata: row.get::<JsonValue, _>("metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn insert(&self, payment: &NewPayment, status: PaymentStatus) -> Result<Option<Payment>> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO payments (id, job_id, email, amount, currency, provider, status,
                                   provider_payment_id, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
             ON CONFLICT (job_id, provider) WHERE status = 'completed' DO NOTHING
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(payment.job_id.as_str())
        .bind(payment.email.as_deref())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.provider.as_str())
        .bind(status.as_str())
        .bind(payment.provider_payment_id.as_deref())
        .bind(&payment.metadata)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_payment_row).transpose()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl PaymentLedger for PgPaymentRepository {
    async fn record_pending(&self, payment: NewPayment) -> Result<Payment> {
        let record = self
            .insert(&payment, PaymentStatus::Pending)
            .await?
            .ok_or_else(|| Error::Internal("pending payment insert returned no row".into()))?;
        debug!(
            subsystem = "db",
            component = "payments",
            job_id = %payment.job_id,
            provider = %payment.provider,
            "Pending payment recorded"
        );
        Ok(record)
    }

    async fn record_completed(&self, payment: NewPayment) -> Result<RecordOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let existing: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM payments
             WHERE job_id = $1 AND provider = $2
             ORDER BY created_at ASC
             FOR UPDATE",
        )
        .bind(payment.job_id.as_str())
        .bind(payment.provider.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if existing
            .iter()
            .any(|(_, status)| status == PaymentStatus::Completed.as_str())
        {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(RecordOutcome::AlreadyCompleted);
        }

        let outcome = if let Some((pending_id, _)) = existing.first() {
            let result = sqlx::query(
                "UPDATE payments
                 SET status = 'completed', email = COALESCE($2, email), amount = $3,
                     currency = $4, provider_payment_id = COALESCE($5, provider_payment_id),
                     metadata = metadata || $6, updated_at = $7
                 WHERE id = $1",
            )
            .bind(pending_id)
            .bind(payment.email.as_deref())
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.provider_payment_id.as_deref())
            .bind(&payment.metadata)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => RecordOutcome::Upgraded,
                Err(e) if is_unique_violation(&e) => return Ok(RecordOutcome::AlreadyCompleted),
                Err(e) => return Err(Error::Database(e)),
            }
        } else {
            let inserted = sqlx::query(
                "INSERT INTO payments (id, job_id, email, amount, currency, provider, status,
                                       provider_payment_id, metadata, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, 'completed', $7, $8, $9, $9)
                 ON CONFLICT (job_id, provider) WHERE status = 'completed' DO NOTHING",
            )
            .bind(Uuid::now_v7())
            .bind(payment.job_id.as_str())
            .bind(payment.email.as_deref())
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.provider.as_str())
            .bind(payment.provider_payment_id.as_deref())
            .bind(&payment.metadata)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            if inserted.rows_affected() == 0 {
                RecordOutcome::AlreadyCompleted
            } else {
                RecordOutcome::Inserted
            }
        };

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "payments",
            job_id = %payment.job_id,
            provider = %payment.provider,
            outcome = ?outcome,
            "Completed payment recorded"
        );
        Ok(outcome)
    }

    async fn confirm_pending(&self, job_id: &JobId, provider: ProviderKind) -> Result<u64> {
        // Only the oldest pending row is upgraded so the one-completed-row rule holds.
        let result = sqlx::query(
            "UPDATE payments SET status = 'completed', updated_at = $3
             WHERE id = (
                 SELECT id FROM payments
                 WHERE job_id = $1 AND provider = $2 AND status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             AND NOT EXISTS (
                 SELECT 1 FROM payments
                 WHERE job_id = $1 AND provider = $2 AND status = 'completed'
             )",
        )
        .bind(job_id.as_str())
        .bind(provider.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected()),
            Err(e) if is_unique_violation(&e) => Ok(0),
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn has_completed(&self, job_id: &JobId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM payments WHERE job_id = $1 AND status = 'completed'
             )",
        )
        .bind(job_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE job_id = $1 ORDER BY created_at ASC"
        ))
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_payment_row).collect()
    }
}
