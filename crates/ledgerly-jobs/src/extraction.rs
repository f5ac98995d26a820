//! Adapter registry keyed by file type.

use std::collections::HashMap;
use std::sync::Arc;

use ledgerly_core::{Error, ExtractedDocument, ExtractionAdapter, FileType, Result};

use crate::adapters::{PdfTextAdapter, SpreadsheetAdapter};

/// Maps each file type to the adapter that reads it.
pub struct ExtractionRegistry {
    adapters: HashMap<FileType, Arc<dyn ExtractionAdapter>>,
}

impl ExtractionRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the PDF and spreadsheet adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfTextAdapter));
        registry.register(Arc::new(SpreadsheetAdapter));
        registry
    }

    /// Register an adapter for every file type it declares. Replaces existing entries.
    pub fn register(&mut self, adapter: Arc<dyn ExtractionAdapter>) {
        for file_type in adapter.file_types() {
            self.adapters.insert(*file_type, Arc::clone(&adapter));
        }
    }

    pub async fn extract(&self, file_type: FileType, data: &[u8]) -> Result<ExtractedDocument> {
        let adapter = self.adapters.get(&file_type).ok_or_else(|| {
            Error::UnsupportedFormat(format!("No extractor registered for {}", file_type))
        })?;
        adapter.extract(data).await
    }

    pub fn has_adapter(&self, file_type: FileType) -> bool {
        self.adapters.contains_key(&file_type)
    }
}

impl Default for ExtractionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_file_type() {
        let registry = ExtractionRegistry::with_defaults();
        for ft in FileType::ALL {
            assert!(registry.has_adapter(ft), "missing adapter for {}", ft);
        }
    }

    #[tokio::test]
    async fn test_missing_adapter_is_unsupported() {
        let registry = ExtractionRegistry::new();
        let err = registry.extract(FileType::Pdf, b"%PDF").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
