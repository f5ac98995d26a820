//! # ledgerly-inference
//!
//! Statement structuring for ledgerly.
//!
//! This crate provides:
//! - [`GeminiBackend`], an HTTP client for the Gemini `generateContent` API
//! - [`parse_structuring_response`], the single validation boundary for
//!   backend output
//! - [`FallbackStructurer`], deterministic output when the backend is
//!   unavailable or untrustworthy
//! - [`StatementStructurer`], which ties the three together and never fails
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockGenerationBackend`] for tests in dependent crates
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgerly_inference::{GeminiBackend, GeminiConfig, StatementStructurer};
//!
//! let backend = GeminiBackend::new(GeminiConfig::new(api_key))?;
//! let structurer = StatementStructurer::new(Arc::new(backend));
//! let preview = structurer.structure(&content, FileType::Pdf).await;
//! ```

pub mod fallback;
pub mod gemini;
pub mod response;
pub mod structuring;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use ledgerly_core::Column;

pub use fallback::{detect_bank, FallbackStructurer};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use response::{parse_structuring_response, StructuredStatement, StructuringFailure, Transaction};
pub use structuring::{StatementStructurer, StructuringConfig, SYSTEM_PROMPT};

/// The six output columns of a structured statement.
pub fn canonical_columns() -> Vec<Column> {
    [
        ("Date", "date"),
        ("Description", "description"),
        ("Debit", "debit"),
        ("Credit", "credit"),
        ("Balance", "balance"),
        ("Category", "category"),
    ]
    .into_iter()
    .map(|(name, key)| Column::new(name, key))
    .collect()
}
