//! Extraction adapters, one per document family.

pub mod pdf;
pub mod spreadsheet;

pub use pdf::PdfTextAdapter;
pub use spreadsheet::SpreadsheetAdapter;

use ledgerly_core::Error;
use tokio::task::JoinError;

/// Maps a failed blocking decode task to an extraction error.
///
/// A decoder panic means the file itself is unreadable, so it is not retried.
pub(crate) fn decode_task_error(decoder: &str, e: JoinError) -> Error {
    if e.is_panic() {
        Error::UnsupportedFormat(format!("{decoder} decoder panicked"))
    } else {
        Error::Extraction(format!("{decoder} extraction task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decoder_panic_is_not_retryable() {
        let err = tokio::task::spawn_blocking(|| panic!("bad cell"))
            .await
            .unwrap_err();
        let mapped = decode_task_error("Spreadsheet", err);
        assert!(matches!(mapped, Error::UnsupportedFormat(_)));
        assert!(!mapped.is_retryable());
    }
}
