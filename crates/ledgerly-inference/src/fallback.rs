//! Deterministic structuring used when the backend is unavailable or its
//! output is rejected.
//!
//! Never calls out, never fails. Text input yields the canonical columns with
//! no rows; table input passes the extracted table through unchanged.

use regex::Regex;

use ledgerly_core::defaults::FALLBACK_CONFIDENCE;
use ledgerly_core::{DocumentContent, PreviewData, PreviewSource};

use crate::canonical_columns;

/// Substring (lowercase) → display name, checked in order.
const KNOWN_BANKS: &[(&str, &str)] = &[
    ("chase", "Chase"),
    ("bank of america", "Bank of America"),
    ("wells fargo", "Wells Fargo"),
    ("citibank", "Citibank"),
    ("hsbc", "HSBC"),
    ("bank central asia", "BCA"),
    ("bank mandiri", "Bank Mandiri"),
    ("bank negara indonesia", "BNI"),
    ("bank rakyat indonesia", "BRI"),
];

pub struct FallbackStructurer {
    period_patterns: Vec<Regex>,
}

impl FallbackStructurer {
    pub fn new() -> Self {
        let period_patterns = [
            r"(\d{4}-\d{2}-\d{2})\s*(?:to|-|–|through)\s*(\d{4}-\d{2}-\d{2})",
            r"(\d{1,2}/\d{1,2}/\d{4})\s*(?:to|-|–|through)\s*(\d{1,2}/\d{1,2}/\d{4})",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect();
        Self { period_patterns }
    }

    pub fn structure(&self, content: &DocumentContent) -> PreviewData {
        let haystack = match content {
            DocumentContent::Text(text) => text.clone(),
            DocumentContent::Table(table) => table
                .columns
                .iter()
                .map(|c| c.name.clone())
                .chain(
                    table
                        .rows
                        .iter()
                        .flat_map(|row| row.values().filter_map(|v| v.as_str().map(str::to_string))),
                )
                .collect::<Vec<_>>()
                .join(" "),
        };

        let (columns, rows) = match content {
            DocumentContent::Text(_) => (canonical_columns(), Vec::new()),
            DocumentContent::Table(table) => (table.columns.clone(), table.rows.clone()),
        };

        PreviewData {
            columns,
            rows,
            confidence_score: FALLBACK_CONFIDENCE,
            detected_bank: detect_bank(&haystack),
            statement_period: self.detect_period(&haystack),
            warnings: vec!["automatic structuring unavailable; review the output".to_string()],
            source: PreviewSource::Fallback,
        }
    }

    fn detect_period(&self, text: &str) -> Option<String> {
        self.period_patterns.iter().find_map(|pattern| {
            pattern
                .captures(text)
                .map(|caps| format!("{} to {}", &caps[1], &caps[2]))
        })
    }
}

impl Default for FallbackStructurer {
    fn default() -> Self {
        Self::new()
    }
}

/// First known bank name found in `text`, case-insensitive.
pub fn detect_bank(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    KNOWN_BANKS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, name)| name.to_string())
}
