//! Data model shared across ledgerly crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

/// A single table row keyed by column key.
pub type Row = Map<String, JsonValue>;

// =============================================================================
// JOB IDENTITY
// =============================================================================

/// Opaque external handle of a conversion job.
///
/// Generated ids are 32 lowercase hex characters (UUIDv7, no hyphens), so they
/// never contain the `_` delimiter used in provider external ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh, time-ordered job id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Wrap an id received from a client or provider.
    ///
    /// Accepts ASCII alphanumerics and `-` only.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Err(Error::InvalidInput(format!("invalid job id: {raw:?}")));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::InvalidInput(format!("invalid job id: {raw:?}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// FILE TYPES
// =============================================================================

/// Declared MIME type of an upload. Immutable for the life of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "application/pdf")]
    Pdf,
    #[serde(rename = "application/vnd.ms-excel")]
    Xls,
    #[serde(rename = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")]
    Xlsx,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Pdf, FileType::Xls, FileType::Xlsx];

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        Self::ALL
            .into_iter()
            .find(|t| t.mime().eq_ignore_ascii_case(essence))
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Xls => "application/vnd.ms-excel",
            FileType::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    /// Short name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Xls => "xls",
            FileType::Xlsx => "xlsx",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(FileType::Pdf),
            "xls" => Some(FileType::Xls),
            "xlsx" => Some(FileType::Xlsx),
            _ => None,
        }
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self, FileType::Xls | FileType::Xlsx)
    }

    /// MIME types accepted at intake.
    pub fn supported_mimes() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.mime()).collect()
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PREVIEW DATA
// =============================================================================

/// Output column: display name plus the row key it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub key: String,
}

impl Column {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// Which structuring path produced a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewSource {
    Primary,
    Fallback,
}

/// Structured result of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewData {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub confidence_score: f64,
    pub detected_bank: Option<String>,
    #[serde(default)]
    pub statement_period: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub source: PreviewSource,
}

impl PreviewData {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First `limit` rows, for the unpaid preview.
    pub fn head(&self, limit: usize) -> &[Row] {
        &self.rows[..self.rows.len().min(limit)]
    }

    pub fn needs_review(&self, threshold: f64) -> bool {
        self.confidence_score < threshold
    }
}

// =============================================================================
// FAILURES
// =============================================================================

/// Stable failure codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    UnsupportedFormat,
    RetriesExhausted,
    PaymentExpired,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            FailureCode::RetriesExhausted => "RETRIES_EXHAUSTED",
            FailureCode::PaymentExpired => "PAYMENT_EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNSUPPORTED_FORMAT" => Some(FailureCode::UnsupportedFormat),
            "RETRIES_EXHAUSTED" => Some(FailureCode::RetriesExhausted),
            "PAYMENT_EXPIRED" => Some(FailureCode::PaymentExpired),
            _ => None,
        }
    }
}

/// Why a job ended up failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: FailureCode,
    pub message: String,
}

impl FailureReason {
    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::UnsupportedFormat,
            message: message.into(),
        }
    }

    pub fn retries_exhausted(message: impl Into<String>) -> Self {
        Self {
            code: FailureCode::RetriesExhausted,
            message: message.into(),
        }
    }

    pub fn payment_expired() -> Self {
        Self {
            code: FailureCode::PaymentExpired,
            message: "payment session expired".to_string(),
        }
    }
}

// =============================================================================
// PAYMENTS
// =============================================================================

/// Payment processor that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stripe,
    Xendit,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::Xendit => "xendit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(ProviderKind::Stripe),
            "xendit" => Some(ProviderKind::Xendit),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            _ => None,
        }
    }
}

/// A row of the append-only payment ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub job_id: JobId,
    pub email: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub provider: ProviderKind,
    pub status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a ledger write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub job_id: JobId,
    pub email: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub provider: ProviderKind,
    pub provider_payment_id: Option<String>,
    pub metadata: JsonValue,
}

impl NewPayment {
    /// Build the record metadata: `paymentId`, `paymentProvider` plus any
    /// provider-specific fields.
    pub fn metadata_with(
        provider: ProviderKind,
        provider_payment_id: Option<&str>,
        extra: Map<String, JsonValue>,
    ) -> JsonValue {
        let mut map = Map::new();
        map.insert(
            "paymentId".to_string(),
            provider_payment_id
                .map(|id| JsonValue::String(id.to_string()))
                .unwrap_or(JsonValue::Null),
        );
        map.insert(
            "paymentProvider".to_string(),
            JsonValue::String(provider.as_str().to_string()),
        );
        map.extend(extra);
        JsonValue::Object(map)
    }
}

/// Outcome of recording a completed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new completed row was written.
    Inserted,
    /// An existing pending row for the same job and provider was upgraded.
    Upgraded,
    /// A completed row already existed; nothing was written.
    AlreadyCompleted,
}

// =============================================================================
// QUEUE
// =============================================================================

/// Work item handed from intake to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: JobId,
    pub file_type: FileType,
    #[serde(with = "base64_bytes")]
    pub file_bytes: Vec<u8>,
    /// SHA-256 hex digest of `file_bytes`.
    pub content_hash: String,
    pub file_name: String,
    pub user_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(
        job_id: JobId,
        file_type: FileType,
        file_bytes: Vec<u8>,
        file_name: impl Into<String>,
        user_email: Option<String>,
    ) -> Self {
        let content_hash = content_hash(&file_bytes);
        Self {
            job_id,
            file_type,
            file_bytes,
            content_hash,
            file_name: file_name.into(),
            user_email,
            created_at: Utc::now(),
        }
    }

    /// Whether the payload still matches the hash taken at intake.
    pub fn verify_integrity(&self) -> bool {
        content_hash(&self.file_bytes) == self.content_hash
    }
}

/// A claimed message together with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: QueueMessage,
    /// 1-based delivery count, including this one.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl Delivery {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// SHA-256 hex digest.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

mod base64_bytes {
    use super::*;
    use base64::Engine;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Row/column table recovered from a spreadsheet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// What the document extractor recovered.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    Text(String),
    Table(ExtractedTable),
}

impl DocumentContent {
    /// True when there is nothing to structure (scanned PDF, empty sheet).
    pub fn is_empty(&self) -> bool {
        match self {
            DocumentContent::Text(text) => text.trim().is_empty(),
            DocumentContent::Table(table) => table.rows.is_empty(),
        }
    }
}

/// Extractor output: content plus format-specific metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub content: DocumentContent,
    pub metadata: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_job_id_has_no_underscore() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(!id.as_str().contains('_'));
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_id_parse_rejects_path_characters() {
        assert!(JobId::parse("abc123").is_ok());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("../etc").is_err());
        assert!(JobId::parse("job_abc").is_err());
    }

    #[test]
    fn test_file_type_from_mime() {
        assert_eq!(FileType::from_mime("application/pdf"), Some(FileType::Pdf));
        assert_eq!(
            FileType::from_mime("application/vnd.ms-excel"),
            Some(FileType::Xls)
        );
        assert_eq!(
            FileType::from_mime(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            Some(FileType::Xlsx)
        );
        assert_eq!(FileType::from_mime("text/plain"), None);
        assert_eq!(
            FileType::from_mime("application/pdf; charset=binary"),
            Some(FileType::Pdf)
        );
    }

    #[test]
    fn test_file_type_serializes_as_mime() {
        let json = serde_json::to_value(FileType::Pdf).unwrap();
        assert_eq!(json, json!("application/pdf"));
    }

    #[test]
    fn test_preview_head_limits_rows() {
        let rows: Vec<Row> = (0..8)
            .map(|i| {
                let mut row = Row::new();
                row.insert("col_0".into(), json!(i));
                row
            })
            .collect();
        let preview = PreviewData {
            columns: vec![Column::new("A", "col_0")],
            rows,
            confidence_score: 0.9,
            detected_bank: None,
            statement_period: None,
            warnings: vec![],
            source: PreviewSource::Primary,
        };
        assert_eq!(preview.head(5).len(), 5);
        assert_eq!(preview.row_count(), 8);
        assert!(!preview.needs_review(0.85));
    }

    #[test]
    fn test_queue_message_wire_format() {
        let msg = QueueMessage::new(
            JobId::parse("abc").unwrap(),
            FileType::Pdf,
            b"%PDF-1.4".to_vec(),
            "s.pdf",
            Some("a@b.c".into()),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["fileBytes"], json!("JVBERi0xLjQ="));
        assert_eq!(json["fileType"], json!("application/pdf"));
        let back: QueueMessage = serde_json::from_value(json).unwrap();
        assert!(back.verify_integrity());
    }

    #[test]
    fn test_payment_metadata_includes_provider() {
        let mut extra = Map::new();
        extra.insert("invoiceUrl".into(), json!("https://x"));
        let meta = NewPayment::metadata_with(ProviderKind::Xendit, Some("inv_1"), extra);
        assert_eq!(meta["paymentId"], json!("inv_1"));
        assert_eq!(meta["paymentProvider"], json!("xendit"));
        assert_eq!(meta["invoiceUrl"], json!("https://x"));
    }
}
