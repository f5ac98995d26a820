//! # ledgerly-db
//!
//! Persistence for ledgerly: the job store, the payment ledger and the
//! processing queue, on PostgreSQL via `sqlx`, plus in-process equivalents
//! for tests and local runs.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledgerly_db::Database;
//! use ledgerly_core::{FileType, JobId, JobStore};
//!
//! let db = Database::connect("postgres://localhost/ledgerly").await?;
//! db.migrate().await?;
//! let job = db.jobs.create(&JobId::generate(), FileType::Pdf).await?;
//! ```

pub mod jobs;
pub mod memory;
pub mod payments;
pub mod pool;
pub mod queue;

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub use jobs::PgJobRepository;
pub use memory::{EntryState, MemoryJobStore, MemoryPaymentLedger, MemoryQueue};
pub use payments::PgPaymentRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use queue::PgQueue;

#[cfg(feature = "migrations")]
use ledgerly_core::Error;
use ledgerly_core::Result;

/// Database handle bundling the PostgreSQL repositories.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
    pub jobs: Arc<PgJobRepository>,
    pub payments: Arc<PgPaymentRepository>,
    pub queue: Arc<PgQueue>,
}

impl Database {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            payments: Arc::new(PgPaymentRepository::new(pool.clone())),
            queue: Arc::new(PgQueue::new(pool.clone())),
            pool,
        }
    }

    /// Connect with pool settings read from the environment.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool_with_config(url, PoolConfig::from_env()).await?;
        Ok(Self::new(pool))
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Close the pool after the worker has drained.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
