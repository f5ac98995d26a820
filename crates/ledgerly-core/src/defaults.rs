//! Centralized default constants for ledgerly.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the server binary reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// INTAKE
// =============================================================================

/// Maximum accepted upload size (25 MiB).
pub const MAX_FILE_SIZE_BYTES: usize = 25 * 1024 * 1024;

/// Processing time estimate returned to clients right after intake.
pub const ESTIMATED_PROCESSING_SECS: u64 = 15;

/// Number of rows exposed by the free preview.
pub const PREVIEW_ROW_LIMIT: usize = 5;

/// Progress percentage reported while a job is processing.
pub const PROCESSING_PROGRESS_PERCENT: u8 = 65;

/// Seconds remaining reported while a job is processing.
pub const PROCESSING_REMAINING_SECS: u64 = 8;

// =============================================================================
// QUEUE & WORKER
// =============================================================================

/// Logical queue name, also the table suffix of the PostgreSQL queue.
pub const QUEUE_NAME: &str = "statement-processing";

/// Maximum number of deliveries per message.
pub const QUEUE_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between deliveries.
pub const QUEUE_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound for a single backoff delay.
pub const QUEUE_BACKOFF_MAX_MS: u64 = 60_000;

/// How long a claimed message stays invisible to other consumers.
/// Must exceed `PROCESSING_TIMEOUT_SECS` so a live worker never loses its lease.
pub const QUEUE_LEASE_SECS: u64 = 120;

/// Jobs processed in parallel by one worker.
pub const WORKER_CONCURRENCY: usize = 5;

/// Polling interval when the queue is empty.
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Wall-clock bound for one job execution (extract + structure).
pub const PROCESSING_TIMEOUT_SECS: u64 = 60;

/// Capacity of the worker event broadcast channel.
pub const WORKER_EVENT_CAPACITY: usize = 256;

// =============================================================================
// EXTRACTION
// =============================================================================

/// PDFs with fewer recovered characters than this are flagged as needing OCR.
pub const PDF_MIN_TEXT_CHARS: usize = 50;

// =============================================================================
// STRUCTURING
// =============================================================================

/// Characters of extracted content sent to the structuring backend.
pub const STRUCTURING_MAX_CHARS: usize = 10_000;

/// Results below this confidence are flagged for review in the preview.
pub const AI_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Backend results below this confidence are discarded in favour of the fallback.
pub const STRUCTURING_MIN_CONFIDENCE: f64 = 0.5;

/// Confidence assigned to fallback output. Always below the primary floor.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Confidence assumed when the backend omits `confidence_score`.
pub const STRUCTURING_DEFAULT_CONFIDENCE: f64 = 0.8;

/// Default Gemini model.
pub const GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default Gemini API base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Sampling temperature for structuring requests.
pub const GEMINI_TEMPERATURE: f32 = 0.4;

/// Output token cap for structuring requests.
pub const GEMINI_MAX_OUTPUT_TOKENS: u32 = 4096;

/// HTTP timeout for a single structuring request.
pub const GEMINI_TIMEOUT_SECS: u64 = 45;

// =============================================================================
// PAYMENTS
// =============================================================================

/// Maximum age of a signed Stripe webhook timestamp.
pub const STRIPE_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Prefix of provider B external ids (`job_<jobId>_<suffix>`).
pub const EXTERNAL_ID_PREFIX: &str = "job_";

/// Single conversion price in US dollars.
pub const PRICE_USD_SINGLE: f64 = 5.0;

/// Monthly plan price in US dollars.
pub const PRICE_USD_MONTHLY: f64 = 7.0;

/// Single conversion price in Indonesian rupiah.
pub const PRICE_IDR_SINGLE: f64 = 40_000.0;

/// Monthly plan price in Indonesian rupiah.
pub const PRICE_IDR_MONTHLY: f64 = 50_000.0;

// =============================================================================
// DELIVERY
// =============================================================================

/// Worksheet name of the generated workbook.
pub const EXPORT_SHEET_NAME: &str = "Statement";

/// Header fill colour of the generated workbook.
pub const EXPORT_HEADER_COLOR: u32 = 0x22C55E;

/// Column width of the generated workbook.
pub const EXPORT_COLUMN_WIDTH: f64 = 20.0;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP port.
pub const SERVER_PORT: u16 = 3000;

/// Default bind address.
pub const SERVER_HOST: &str = "0.0.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_outlives_job_timeout() {
        assert!(QUEUE_LEASE_SECS > PROCESSING_TIMEOUT_SECS);
    }

    #[test]
    fn test_fallback_confidence_below_floor() {
        assert!(FALLBACK_CONFIDENCE < STRUCTURING_MIN_CONFIDENCE);
        assert!(STRUCTURING_MIN_CONFIDENCE < AI_CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn test_max_file_size() {
        assert_eq!(MAX_FILE_SIZE_BYTES, 26_214_400);
    }
}
