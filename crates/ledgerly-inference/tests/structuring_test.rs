//! Structuring adapter against a stubbed Gemini endpoint.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledgerly_core::defaults::{FALLBACK_CONFIDENCE, STRUCTURING_MIN_CONFIDENCE};
use ledgerly_core::{DocumentContent, FileType, GenerationBackend, PreviewSource};
use ledgerly_inference::{GeminiBackend, GeminiConfig, StatementStructurer};

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

async fn structurer_for(server: &MockServer) -> StatementStructurer {
    let backend = GeminiBackend::new(GeminiConfig::new("test-key").with_base_url(server.uri()))
        .expect("Failed to create backend");
    StatementStructurer::new(Arc::new(backend))
}

#[tokio::test]
async fn test_primary_path_produces_canonical_rows() {
    let server = MockServer::start().await;
    let body = json!({
        "bank_name": "Wells Fargo",
        "statement_period": "2024-03-01 to 2024-03-31",
        "transactions": [
            {"date": "2024-03-02", "description": "Payroll", "debit": null, "credit": 2500.0, "balance": 3100.0, "category": "Salary"},
            {"date": "2024-03-03", "description": "Rent", "debit": 1200.0, "credit": null, "balance": 1900.0, "category": "Housing"}
        ],
        "confidence_score": 0.91,
        "warnings": []
    })
    .to_string();

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(&body)))
        .expect(1)
        .mount(&server)
        .await;

    let structurer = structurer_for(&server).await;
    let preview = structurer
        .structure(
            &DocumentContent::Text("WELLS FARGO statement".into()),
            FileType::Pdf,
        )
        .await;

    assert_eq!(preview.source, PreviewSource::Primary);
    assert_eq!(preview.rows.len(), 2);
    assert_eq!(preview.confidence_score, 0.91);
    assert_eq!(preview.detected_bank.as_deref(), Some("Wells Fargo"));
    assert_eq!(preview.rows[1]["debit"], json!(1200.0));
    let keys: Vec<&str> = preview.columns.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(
        keys,
        ["date", "description", "debit", "credit", "balance", "category"]
    );
}

#[tokio::test]
async fn test_unreachable_backend_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let structurer = structurer_for(&server).await;
    let preview = structurer
        .structure(
            &DocumentContent::Text("Chase checking statement".into()),
            FileType::Pdf,
        )
        .await;

    assert_eq!(preview.source, PreviewSource::Fallback);
    assert_eq!(preview.confidence_score, FALLBACK_CONFIDENCE);
    assert!(preview.confidence_score < STRUCTURING_MIN_CONFIDENCE);
    assert_eq!(preview.detected_bank.as_deref(), Some("Chase"));
    assert_eq!(preview.columns.len(), 6);
}

#[tokio::test]
async fn test_malformed_output_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_reply(r#"{"bank_name": "X", "rows": []}"#)),
        )
        .mount(&server)
        .await;

    let structurer = structurer_for(&server).await;
    let preview = structurer
        .structure(&DocumentContent::Text("statement".into()), FileType::Pdf)
        .await;
    assert_eq!(preview.source, PreviewSource::Fallback);
}

#[tokio::test]
async fn test_low_confidence_result_uses_fallback() {
    let server = MockServer::start().await;
    let body = json!({
        "transactions": [{"date": "2024-01-01", "description": "?", "debit": 1.0}],
        "confidence_score": 0.2
    })
    .to_string();
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(&body)))
        .mount(&server)
        .await;

    let structurer = structurer_for(&server).await;
    let preview = structurer
        .structure(&DocumentContent::Text("statement".into()), FileType::Pdf)
        .await;
    assert_eq!(preview.source, PreviewSource::Fallback);
    assert!(preview.rows.is_empty());
}

#[tokio::test]
async fn test_prompt_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gemini_reply(r#"{"transactions": []}"#)),
        )
        .mount(&server)
        .await;

    let structurer = structurer_for(&server).await;
    let long_text = "x".repeat(25_000);
    structurer
        .structure(&DocumentContent::Text(long_text), FileType::Pdf)
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = sent["contents"][0]["parts"][0]["text"].as_str().unwrap();
    let xs = prompt.chars().filter(|c| *c == 'x').count();
    assert_eq!(xs, 10_000);
    assert!(sent["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .contains("confidence_score"));
}

#[tokio::test]
async fn test_empty_candidates_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let backend =
        GeminiBackend::new(GeminiConfig::new("test-key").with_base_url(server.uri())).unwrap();
    let result = backend.generate_with_system("sys", "prompt").await;
    assert!(result.is_err());
}
