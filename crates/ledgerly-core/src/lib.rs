//! # ledgerly-core
//!
//! Core types, traits, and abstractions for ledgerly, the statement
//! conversion pipeline.
//!
//! This crate provides the job lifecycle state machine, the shared data model
//! and the trait seams (job store, payment ledger, queue, extraction and
//! generation backends) that other ledgerly crates implement or consume.

pub mod defaults;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use lifecycle::{Job, JobEvent, JobState, JobStatus, Transition};
pub use models::*;
pub use traits::*;
