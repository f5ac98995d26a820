//! PDF text extraction.
//!
//! `pdf-extract` gives the best reading order but can panic or fail on unusual
//! fonts, so it runs under `catch_unwind` with lopdf's per-page extraction as
//! the fallback. A document lopdf cannot load at all is an unsupported format.

use async_trait::async_trait;
use lopdf::{Document, Object};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use ledgerly_core::defaults::PDF_MIN_TEXT_CHARS;
use ledgerly_core::{
    DocumentContent, Error, ExtractedDocument, ExtractionAdapter, FileType, Result,
};

/// Info dictionary keys copied into metadata.
const INFO_FIELDS: &[(&str, &str)] = &[
    ("Title", "title"),
    ("Author", "author"),
    ("Subject", "subject"),
    ("Creator", "creator"),
    ("Producer", "producer"),
    ("CreationDate", "creation_date"),
    ("ModDate", "modification_date"),
];

/// Adapter for `application/pdf`.
pub struct PdfTextAdapter;

#[async_trait]
impl ExtractionAdapter for PdfTextAdapter {
    fn file_types(&self) -> &'static [FileType] {
        &[FileType::Pdf]
    }

    async fn extract(&self, data: &[u8]) -> Result<ExtractedDocument> {
        if !data.starts_with(b"%PDF") {
            return Err(Error::UnsupportedFormat(
                "file does not start with a %PDF header".into(),
            ));
        }

        let bytes = data.to_vec();
        tokio::task::spawn_blocking(move || extract_pdf(&bytes))
            .await
            .map_err(|e| super::decode_task_error("PDF", e))?
    }

    fn name(&self) -> &str {
        "pdf_text"
    }
}

fn extract_pdf(data: &[u8]) -> Result<ExtractedDocument> {
    let doc = Document::load_mem(data)
        .map_err(|e| Error::UnsupportedFormat(format!("PDF could not be parsed: {e}")))?;
    let page_count = doc.get_pages().len();

    let text = match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(data)) {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        Ok(Ok(_)) => lopdf_text(&doc),
        Ok(Err(e)) => {
            debug!(error = %e, "pdf-extract failed, using lopdf text");
            lopdf_text(&doc)
        }
        Err(_) => {
            warn!("pdf-extract panicked, using lopdf text");
            lopdf_text(&doc)
        }
    };

    let text = text.trim().to_string();
    let meaningful_chars = text.chars().filter(|c| !c.is_whitespace()).count();

    let mut metadata = read_info(&doc);
    metadata.insert("page_count".into(), json!(page_count));
    metadata.insert("char_count".into(), json!(text.chars().count()));
    metadata.insert("line_count".into(), json!(text.lines().count()));
    metadata.insert(
        "needs_ocr".into(),
        json!(meaningful_chars < PDF_MIN_TEXT_CHARS),
    );

    Ok(ExtractedDocument {
        content: DocumentContent::Text(text),
        metadata: JsonValue::Object(metadata),
    })
}

fn lopdf_text(doc: &Document) -> String {
    let mut text = String::new();
    for page_num in doc.get_pages().keys() {
        if let Ok(page_text) = doc.extract_text(&[*page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }
    text
}

fn read_info(doc: &Document) -> Map<String, JsonValue> {
    let mut out = Map::new();
    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return out;
    };

    for (pdf_key, field) in INFO_FIELDS {
        if let Ok(Object::String(bytes, _)) = info.get(pdf_key.as_bytes()) {
            let value = decode_pdf_string(bytes);
            if !value.is_empty() {
                out.insert((*field).to_string(), JsonValue::String(value));
            }
        }
    }
    out
}

/// PDF text strings are UTF-16BE with a BOM or PDFDocEncoding (treated as Latin-1 compatible UTF-8 here).
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units).trim().to_string();
    }
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream, StringFormat};

    fn build_pdf(content: &str, title: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(title) = title {
            let info_id = doc.add_object(dictionary! {
                "Title" => Object::String(title.as_bytes().to_vec(), StringFormat::Literal),
            });
            doc.trailer.set("Info", info_id);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_rejects_non_pdf_bytes() {
        let err = PdfTextAdapter.extract(b"PK\x03\x04 not a pdf").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_rejects_truncated_pdf() {
        let err = PdfTextAdapter
            .extract(b"%PDF-1.4\n garbage without xref")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_extracts_text_and_metadata() {
        let pdf = build_pdf(
            "BT /F1 12 Tf 50 700 Td (Chase Bank Statement January) Tj ET",
            Some("January Statement"),
        );
        let doc = PdfTextAdapter.extract(&pdf).await.unwrap();
        match &doc.content {
            DocumentContent::Text(text) => assert!(text.contains("Chase")),
            other => panic!("expected text, got {:?}", other),
        }
        assert_eq!(doc.metadata["page_count"], json!(1));
        assert_eq!(doc.metadata["title"], json!("January Statement"));
        assert_eq!(doc.metadata["needs_ocr"], json!(true));
    }

    #[tokio::test]
    async fn test_image_only_pdf_yields_empty_text() {
        let pdf = build_pdf("q 1 0 0 1 0 0 cm Q", None);
        let doc = PdfTextAdapter.extract(&pdf).await.unwrap();
        assert!(doc.content.is_empty());
        assert_eq!(doc.metadata["needs_ocr"], json!(true));
    }

    #[test]
    fn test_decode_utf16_string() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_pdf_string(&bytes), "Hi");
        assert_eq!(decode_pdf_string(b"  plain "), "plain");
    }
}
