//! Spreadsheet extraction for xls and xlsx workbooks.
//!
//! Only the first worksheet is read. Its first row supplies column names,
//! keys are positional (`col_0`, `col_1`, ...) so duplicate or blank headers
//! never collide.

use std::io::Cursor;

use async_trait::async_trait;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::{json, Value as JsonValue};

use ledgerly_core::{
    Column, DocumentContent, Error, ExtractedDocument, ExtractedTable, ExtractionAdapter,
    FileType, Result, Row,
};

/// Adapter for `application/vnd.ms-excel` and the OOXML spreadsheet type.
pub struct SpreadsheetAdapter;

#[async_trait]
impl ExtractionAdapter for SpreadsheetAdapter {
    fn file_types(&self) -> &'static [FileType] {
        &[FileType::Xls, FileType::Xlsx]
    }

    async fn extract(&self, data: &[u8]) -> Result<ExtractedDocument> {
        let bytes = data.to_vec();
        tokio::task::spawn_blocking(move || extract_workbook(bytes))
            .await
            .map_err(|e| super::decode_task_error("Spreadsheet", e))?
    }

    fn name(&self) -> &str {
        "spreadsheet"
    }
}

fn extract_workbook(bytes: Vec<u8>) -> Result<ExtractedDocument> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| Error::UnsupportedFormat(format!("Workbook could not be opened: {e}")))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| Error::UnsupportedFormat("Workbook has no worksheets".into()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| Error::UnsupportedFormat(format!("Worksheet could not be read: {e}")))?;

    let width = range.width();
    let mut rows_iter = range.rows();

    let columns: Vec<Column> = match rows_iter.next() {
        Some(header) => (0..width)
            .map(|i| {
                let key = format!("col_{i}");
                let name = header
                    .get(i)
                    .map(|cell| cell.to_string().trim().to_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| key.clone());
                Column::new(name, key)
            })
            .collect(),
        None => Vec::new(),
    };

    let rows: Vec<Row> = rows_iter
        .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|cells| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| (col.key.clone(), cell_value(cells.get(i))))
                .collect()
        })
        .collect();

    let metadata = json!({
        "sheet_name": sheet_name,
        "sheet_count": sheet_names.len(),
        "row_count": rows.len(),
        "column_count": columns.len(),
    });

    Ok(ExtractedDocument {
        content: DocumentContent::Table(ExtractedTable { columns, rows }),
        metadata,
    })
}

fn cell_value(cell: Option<&Data>) -> JsonValue {
    match cell {
        None | Some(Data::Empty) | Some(Data::Error(_)) => JsonValue::Null,
        Some(Data::String(s)) => JsonValue::String(s.clone()),
        Some(Data::Int(i)) => json!(i),
        Some(Data::Float(f)) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(Data::Bool(b)) => JsonValue::Bool(*b),
        Some(other) => JsonValue::String(other.to_string()),
    }
}
