//! Spreadsheet rendering of structured previews.

use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use serde_json::Value as JsonValue;
use thiserror::Error;

use ledgerly_core::defaults::{EXPORT_COLUMN_WIDTH, EXPORT_HEADER_COLOR, EXPORT_SHEET_NAME};
use ledgerly_core::{JobId, PreviewData};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("workbook error: {0}")]
    Workbook(#[from] XlsxError),

    #[error("too many columns: {0}")]
    TooManyColumns(usize),

    #[error("too many rows: {0}")]
    TooManyRows(usize),
}

impl From<ExportError> for ledgerly_core::Error {
    fn from(err: ExportError) -> Self {
        ledgerly_core::Error::Internal(err.to_string())
    }
}

/// Download name for a job's export.
pub fn export_filename(job_id: &JobId) -> String {
    format!("statement_{}.xlsx", job_id)
}

/// Render every preview row into a single-sheet workbook.
///
/// Header row holds the column display names; each data row reads cells by
/// column key. Missing and null cells are left blank.
pub fn render_xlsx(preview: &PreviewData) -> Result<Vec<u8>, ExportError> {
    let column_count = preview.columns.len();
    if column_count > u16::MAX as usize {
        return Err(ExportError::TooManyColumns(column_count));
    }
    if preview.rows.len() >= u32::MAX as usize {
        return Err(ExportError::TooManyRows(preview.rows.len()));
    }

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(EXPORT_SHEET_NAME)?;

    let header = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(EXPORT_HEADER_COLOR));

    for (col, column) in preview.columns.iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, &column.name, &header)?;
        sheet.set_column_width(col, EXPORT_COLUMN_WIDTH)?;
    }

    for (idx, row) in preview.rows.iter().enumerate() {
        let row_num = idx as u32 + 1;
        for (col, column) in preview.columns.iter().enumerate() {
            if let Some(value) = row.get(&column.key) {
                write_cell(sheet, row_num, col as u16, value)?;
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, value: &JsonValue) -> Result<(), XlsxError> {
    match value {
        JsonValue::Null => {}
        JsonValue::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        JsonValue::Number(n) => match n.as_f64() {
            Some(f) => {
                sheet.write_number(row, col, f)?;
            }
            None => {
                sheet.write_string(row, col, n.to_string())?;
            }
        },
        JsonValue::String(s) => {
            sheet.write_string(row, col, s)?;
        }
        other => {
            sheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}
