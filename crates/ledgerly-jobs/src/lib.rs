//! # ledgerly-jobs
//!
//! Background processing for uploaded statements.
//!
//! This crate provides:
//! - Extraction adapters for PDF ([`PdfTextAdapter`]) and spreadsheets
//!   ([`SpreadsheetAdapter`]) behind an [`ExtractionRegistry`]
//! - [`StatementJobHandler`], which extracts a document and structures it
//! - [`JobWorker`], a queue consumer with bounded retries and backoff
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgerly_jobs::{ExtractionRegistry, StatementJobHandler, WorkerBuilder, WorkerConfig};
//!
//! let handler = StatementJobHandler::new(Arc::new(ExtractionRegistry::with_defaults()), structurer);
//! let worker = WorkerBuilder::new(db.jobs.clone(), db.queue.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(handler)
//!     .build()?;
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod adapters;
pub mod extraction;
pub mod handler;
pub mod retry;
pub mod statement_handler;
pub mod worker;

pub use adapters::{PdfTextAdapter, SpreadsheetAdapter};
pub use extraction::ExtractionRegistry;
pub use handler::{JobContext, JobHandler, JobResult};
pub use retry::RetryPolicy;
pub use statement_handler::StatementJobHandler;
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
