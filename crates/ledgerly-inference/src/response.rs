//! Schema-validating boundary for structuring backend output.
//!
//! Everything the backend returns passes through [`parse_structuring_response`]
//! exactly once. Callers get a typed statement or a single
//! [`StructuringFailure`]; nothing downstream inspects raw JSON.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use ledgerly_core::defaults::STRUCTURING_DEFAULT_CONFIDENCE;

const UNKNOWN: &str = "Unknown";

/// Why a backend response was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuringFailure {
    #[error("backend call failed: {0}")]
    Backend(String),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response has no transactions array")]
    MissingTransactions,

    #[error("confidence_score is invalid: {0}")]
    InvalidConfidence(String),

    #[error("transaction {index} is invalid: {reason}")]
    InvalidTransaction { index: usize, reason: String },
}

/// One canonical transaction row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub date: String,
    pub description: String,
    pub debit: Option<f64>,
    pub credit: Option<f64>,
    pub balance: Option<f64>,
    pub category: Option<String>,
}

/// A validated backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredStatement {
    pub bank_name: Option<String>,
    pub statement_period: Option<String>,
    pub transactions: Vec<Transaction>,
    pub confidence_score: f64,
    pub warnings: Vec<String>,
}

/// Validate a raw backend response.
pub fn parse_structuring_response(raw: &str) -> Result<StructuredStatement, StructuringFailure> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(StructuringFailure::EmptyResponse);
    }

    let value: JsonValue =
        serde_json::from_str(body).map_err(|e| StructuringFailure::InvalidJson(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| StructuringFailure::InvalidJson("top level is not an object".into()))?;

    let transactions = object
        .get("transactions")
        .and_then(JsonValue::as_array)
        .ok_or(StructuringFailure::MissingTransactions)?
        .iter()
        .enumerate()
        .map(|(index, item)| parse_transaction(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    let confidence_score = match object.get("confidence_score") {
        None | Some(JsonValue::Null) => STRUCTURING_DEFAULT_CONFIDENCE,
        Some(JsonValue::Number(n)) => {
            let score = n.as_f64().unwrap_or(f64::NAN);
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(StructuringFailure::InvalidConfidence(n.to_string()));
            }
            score
        }
        Some(other) => return Err(StructuringFailure::InvalidConfidence(other.to_string())),
    };

    let warnings = object
        .get("warnings")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|w| w.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(StructuredStatement {
        bank_name: non_empty_str(object, "bank_name"),
        statement_period: non_empty_str(object, "statement_period"),
        transactions,
        confidence_score,
        warnings,
    })
}

fn parse_transaction(index: usize, item: &JsonValue) -> Result<Transaction, StructuringFailure> {
    let object = item
        .as_object()
        .ok_or_else(|| StructuringFailure::InvalidTransaction {
            index,
            reason: "not an object".into(),
        })?;

    let amount = |field: &str| -> Result<Option<f64>, StructuringFailure> {
        parse_amount(object.get(field)).map_err(|reason| StructuringFailure::InvalidTransaction {
            index,
            reason: format!("{field}: {reason}"),
        })
    };

    Ok(Transaction {
        date: non_empty_str(object, "date").unwrap_or_else(|| UNKNOWN.to_string()),
        description: non_empty_str(object, "description").unwrap_or_else(|| UNKNOWN.to_string()),
        debit: amount("debit")?,
        credit: amount("credit")?,
        balance: amount("balance")?,
        category: non_empty_str(object, "category"),
    })
}

/// Numbers pass through; numeric strings such as `"1,234.50"` or `"$12"` are
/// coerced; null and empty strings are absent.
fn parse_amount(value: Option<&JsonValue>) -> Result<Option<f64>, String> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| format!("non-finite number {n}")),
        Some(JsonValue::String(s)) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, ',' | '$' | ' ' | '€' | '£'))
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| format!("not a number: {s:?}"))
        }
        Some(other) => Err(format!("unexpected value {other}")),
    }
}

fn non_empty_str(object: &Map<String, JsonValue>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_response() {
        let raw = r#"{
            "bank_name": "Chase",
            "statement_period": "2024-01-01 to 2024-01-31",
            "transactions": [
                {"date": "2024-01-02", "description": "Coffee", "debit": 4.5, "credit": null, "balance": 995.5, "category": "Food"}
            ],
            "confidence_score": 0.93,
            "warnings": ["page 2 blurry"]
        }"#;
        let parsed = parse_structuring_response(raw).unwrap();
        assert_eq!(parsed.bank_name.as_deref(), Some("Chase"));
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.transactions[0].debit, Some(4.5));
        assert_eq!(parsed.transactions[0].credit, None);
        assert_eq!(parsed.confidence_score, 0.93);
        assert_eq!(parsed.warnings, vec!["page 2 blurry".to_string()]);
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let raw = "```json\n{\"transactions\": [], \"confidence_score\": 0.7}\n```";
        let parsed = parse_structuring_response(raw).unwrap();
        assert!(parsed.transactions.is_empty());
        assert_eq!(parsed.confidence_score, 0.7);
    }

    #[test]
    fn test_missing_transactions_rejected() {
        let err = parse_structuring_response(r#"{"bank_name": "X"}"#).unwrap_err();
        assert_eq!(err, StructuringFailure::MissingTransactions);
        let err = parse_structuring_response(r#"{"transactions": "none"}"#).unwrap_err();
        assert_eq!(err, StructuringFailure::MissingTransactions);
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let err =
            parse_structuring_response(r#"{"transactions": [], "confidence_score": 1.5}"#)
                .unwrap_err();
        assert!(matches!(err, StructuringFailure::InvalidConfidence(_)));
        let err =
            parse_structuring_response(r#"{"transactions": [], "confidence_score": "high"}"#)
                .unwrap_err();
        assert!(matches!(err, StructuringFailure::InvalidConfidence(_)));
    }

    #[test]
    fn test_missing_confidence_uses_default() {
        let parsed = parse_structuring_response(r#"{"transactions": []}"#).unwrap();
        assert_eq!(parsed.confidence_score, STRUCTURING_DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_numeric_strings_coerced() {
        let raw = r#"{"transactions": [{"debit": "1,234.50", "credit": "", "balance": "$10"}]}"#;
        let parsed = parse_structuring_response(raw).unwrap();
        let tx = &parsed.transactions[0];
        assert_eq!(tx.debit, Some(1234.5));
        assert_eq!(tx.credit, None);
        assert_eq!(tx.balance, Some(10.0));
        assert_eq!(tx.date, "Unknown");
        assert_eq!(tx.description, "Unknown");
    }

    #[test]
    fn test_garbage_amount_rejected() {
        let raw = r#"{"transactions": [{"debit": "lots"}]}"#;
        let err = parse_structuring_response(raw).unwrap_err();
        assert!(matches!(
            err,
            StructuringFailure::InvalidTransaction { index: 0, .. }
        ));
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(
            parse_structuring_response("I could not read the statement"),
            Err(StructuringFailure::InvalidJson(_))
        ));
        assert_eq!(
            parse_structuring_response("   "),
            Err(StructuringFailure::EmptyResponse)
        );
    }
}
