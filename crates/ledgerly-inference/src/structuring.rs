//! Structuring service adapter: backend call, validation, fallback.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use ledgerly_core::defaults::{STRUCTURING_MAX_CHARS, STRUCTURING_MIN_CONFIDENCE};
use ledgerly_core::{
    DocumentContent, FileType, GenerationBackend, PreviewData, PreviewSource, Row,
};

use crate::fallback::FallbackStructurer;
use crate::response::{parse_structuring_response, StructuredStatement, StructuringFailure};
use crate::canonical_columns;

/// Extraction contract sent as the system instruction.
pub const SYSTEM_PROMPT: &str = r#"You are a bank statement parser. Extract structured transaction data from the statement content you are given.

Output ONLY valid JSON with exactly this structure:
{
  "bank_name": "string",
  "statement_period": "YYYY-MM-DD to YYYY-MM-DD",
  "transactions": [
    {
      "date": "YYYY-MM-DD",
      "description": "string",
      "debit": number|null,
      "credit": number|null,
      "balance": number,
      "category": "string|null"
    }
  ],
  "confidence_score": 0.0-1.0,
  "warnings": ["string"]
}

Rules:
- Debit is money leaving the account, credit is money entering it. Both are positive numbers.
- Balance is the running balance after the transaction.
- If an amount is unclear, set confidence_score below 0.8.
- Never invent data. When uncertain, lower confidence_score and add a warning.
- Detect the bank name and statement period from the content when present.
- Categorize transactions (for example Food, Salary, Utilities, Transfer).
"#;

/// Tunables for the structuring adapter.
#[derive(Debug, Clone)]
pub struct StructuringConfig {
    /// Characters of content sent to the backend.
    pub max_chars: usize,
    /// Backend results below this confidence are replaced by the fallback.
    pub min_confidence: f64,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            max_chars: STRUCTURING_MAX_CHARS,
            min_confidence: STRUCTURING_MIN_CONFIDENCE,
        }
    }
}

impl StructuringConfig {
    /// `STRUCTURING_MIN_CONFIDENCE` overrides the confidence floor.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(floor) = std::env::var("STRUCTURING_MIN_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| (0.0..=1.0).contains(v))
        {
            config.min_confidence = floor;
        }
        config
    }

    pub fn with_min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = floor;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

/// Turns extracted content into preview data. Never fails.
pub struct StatementStructurer {
    backend: Arc<dyn GenerationBackend>,
    fallback: FallbackStructurer,
    config: StructuringConfig,
}

impl StatementStructurer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::with_config(backend, StructuringConfig::default())
    }

    pub fn with_config(backend: Arc<dyn GenerationBackend>, config: StructuringConfig) -> Self {
        Self {
            backend,
            fallback: FallbackStructurer::new(),
            config,
        }
    }

    pub fn config(&self) -> &StructuringConfig {
        &self.config
    }

    #[instrument(skip(self, content), fields(subsystem = "inference", component = "structurer", file_type = %file_type))]
    pub async fn structure(&self, content: &DocumentContent, file_type: FileType) -> PreviewData {
        let start = Instant::now();

        match self.try_primary(content, file_type).await {
            Ok(statement) if statement.confidence_score >= self.config.min_confidence => {
                let preview = to_preview(statement);
                info!(
                    confidence = preview.confidence_score,
                    row_count = preview.row_count(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Statement structured"
                );
                preview
            }
            Ok(statement) => {
                warn!(
                    confidence = statement.confidence_score,
                    floor = self.config.min_confidence,
                    "Structuring confidence below floor, using fallback"
                );
                self.fallback.structure(content)
            }
            Err(failure) => {
                warn!(error = %failure, "Structuring failed, using fallback");
                self.fallback.structure(content)
            }
        }
    }

    async fn try_primary(
        &self,
        content: &DocumentContent,
        file_type: FileType,
    ) -> Result<StructuredStatement, StructuringFailure> {
        let body = render_content(content);
        let truncated = truncate_chars(&body, self.config.max_chars);
        debug!(
            byte_len = truncated.len(),
            truncated = truncated.len() < body.len(),
            "Sending content to structuring backend"
        );

        let prompt = format!(
            "Parse the following {} bank statement content:\n\n{}\n\nReturn ONLY the JSON response as specified.",
            file_type.as_str(),
            truncated
        );

        let raw = self
            .backend
            .generate_with_system(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| StructuringFailure::Backend(e.to_string()))?;

        parse_structuring_response(&raw)
    }
}

/// Plain text for the prompt. Tables become JSON rows keyed by column name.
fn render_content(content: &DocumentContent) -> String {
    match content {
        DocumentContent::Text(text) => text.clone(),
        DocumentContent::Table(table) => {
            let rows: Vec<JsonValue> = table
                .rows
                .iter()
                .map(|row| {
                    let named: serde_json::Map<String, JsonValue> = table
                        .columns
                        .iter()
                        .map(|c| {
                            (
                                c.name.clone(),
                                row.get(&c.key).cloned().unwrap_or(JsonValue::Null),
                            )
                        })
                        .collect();
                    JsonValue::Object(named)
                })
                .collect();
            JsonValue::Array(rows).to_string()
        }
    }
}

/// At most `max` characters, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn to_preview(statement: StructuredStatement) -> PreviewData {
    let mut warnings = statement.warnings;
    let rows: Vec<Row> = statement
        .transactions
        .into_iter()
        .enumerate()
        .map(|(i, tx)| {
            if tx.debit.is_some() && tx.credit.is_some() {
                warnings.push(format!("row {} has both debit and credit", i + 1));
            }
            let value = json!({
                "date": tx.date,
                "description": tx.description,
                "debit": tx.debit,
                "credit": tx.credit,
                "balance": tx.balance,
                "category": tx.category,
            });
            match value {
                JsonValue::Object(map) => map,
                _ => Row::new(),
            }
        })
        .collect();

    PreviewData {
        columns: canonical_columns(),
        rows,
        confidence_score: statement.confidence_score,
        detected_bank: statement.bank_name,
        statement_period: statement.statement_period,
        warnings,
        source: PreviewSource::Primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerly_core::{Column, ExtractedTable};

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_render_table_uses_column_names() {
        let mut row = Row::new();
        row.insert("col_0".into(), json!("2024-01-02"));
        let table = ExtractedTable {
            columns: vec![Column::new("Date", "col_0"), Column::new("Amount", "col_1")],
            rows: vec![row],
        };
        let rendered = render_content(&DocumentContent::Table(table));
        let parsed: JsonValue = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!([{"Date": "2024-01-02", "Amount": null}]));
    }

    #[test]
    fn test_to_preview_warns_on_debit_and_credit() {
        let statement = StructuredStatement {
            bank_name: Some("Chase".into()),
            statement_period: None,
            transactions: vec![crate::response::Transaction {
                date: "2024-01-02".into(),
                description: "odd".into(),
                debit: Some(1.0),
                credit: Some(2.0),
                balance: None,
                category: None,
            }],
            confidence_score: 0.9,
            warnings: vec![],
        };
        let preview = to_preview(statement);
        assert_eq!(preview.warnings, vec!["row 1 has both debit and credit"]);
        assert_eq!(preview.rows[0]["debit"], json!(1.0));
        assert_eq!(preview.columns.len(), 6);
    }
}
