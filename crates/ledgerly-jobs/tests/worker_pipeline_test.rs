//! End-to-end worker runs over in-memory stores.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use tokio::sync::{broadcast, watch};

use ledgerly_core::defaults::AI_CONFIDENCE_THRESHOLD;
use ledgerly_core::{
    Error, ExtractedDocument, ExtractionAdapter, FailureCode, FileType, JobId, JobStatus,
    JobStore, PreviewSource, QueueClient, QueueMessage, Result,
};
use ledgerly_db::{EntryState, MemoryJobStore, MemoryQueue};
use ledgerly_inference::mock::MockGenerationBackend;
use ledgerly_inference::StatementStructurer;
use ledgerly_jobs::{
    ExtractionRegistry, RetryPolicy, StatementJobHandler, WorkerBuilder, WorkerConfig,
    WorkerEvent, WorkerHandle,
};

struct Harness {
    jobs: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    events: broadcast::Receiver<WorkerEvent>,
    handle: WorkerHandle,
}

fn start(registry: ExtractionRegistry, backend: MockGenerationBackend) -> Harness {
    start_with_config(registry, backend, WorkerConfig::default())
}

fn start_with_config(
    registry: ExtractionRegistry,
    backend: MockGenerationBackend,
    config: WorkerConfig,
) -> Harness {
    let jobs = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let handler = StatementJobHandler::new(
        Arc::new(registry),
        Arc::new(StatementStructurer::new(Arc::new(backend))),
    );
    let worker = WorkerBuilder::new(jobs.clone(), queue.clone())
        .with_config(config.with_poll_interval(10))
        .with_retry_policy(RetryPolicy::default().with_base_delay_ms(5))
        .with_handler(handler)
        .build()
        .expect("worker builds");
    let events = worker.events();
    let handle = worker.start();
    Harness {
        jobs,
        queue,
        events,
        handle,
    }
}

async fn submit(h: &Harness, file_type: FileType, bytes: Vec<u8>) -> JobId {
    let job_id = JobId::generate();
    h.jobs.create(&job_id, file_type).await.unwrap();
    h.queue
        .enqueue(QueueMessage::new(job_id.clone(), file_type, bytes, "upload", None), 3)
        .await
        .unwrap();
    job_id
}

/// Collects events for `job_id` until it completes, fails or is skipped.
async fn settle(events: &mut broadcast::Receiver<WorkerEvent>, job_id: &JobId) -> Vec<WorkerEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if event.job_id() != Some(job_id) {
                continue;
            }
            let terminal = matches!(
                event,
                WorkerEvent::JobCompleted { .. }
                    | WorkerEvent::JobFailed { .. }
                    | WorkerEvent::JobSkipped { .. }
            );
            seen.push(event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("job settled in time");
    seen
}

fn statement_xlsx(data_rows: usize) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in ["Date", "Description", "Amount"].iter().enumerate() {
        sheet.write_string(0, col as u16, *name).unwrap();
    }
    for i in 0..data_rows {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, format!("2024-01-{:02}", i + 1)).unwrap();
        sheet.write_string(row, 1, format!("Purchase {}", i + 1)).unwrap();
        sheet.write_number(row, 2, 10.0 * (i + 1) as f64).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

fn image_only_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, b"q Q".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
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
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Fails every call with a transient error.
struct FlakyAdapter {
    calls: AtomicU32,
}

#[async_trait]
impl ExtractionAdapter for FlakyAdapter {
    fn file_types(&self) -> &'static [FileType] {
        &[FileType::Pdf]
    }

    async fn extract(&self, _data: &[u8]) -> Result<ExtractedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Extraction("decoder temporarily unavailable".into()))
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Never finishes on its own; the worker's timeout has to cut it off.
struct StalledAdapter {
    calls: AtomicU32,
}

#[async_trait]
impl ExtractionAdapter for StalledAdapter {
    fn file_types(&self) -> &'static [FileType] {
        &[FileType::Pdf]
    }

    async fn extract(&self, _data: &[u8]) -> Result<ExtractedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(Error::Extraction("unreachable".into()))
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// Holds each PDF extraction until the gate opens.
struct GatedAdapter {
    open: watch::Receiver<bool>,
}

#[async_trait]
impl ExtractionAdapter for GatedAdapter {
    fn file_types(&self) -> &'static [FileType] {
        &[FileType::Pdf]
    }

    async fn extract(&self, _data: &[u8]) -> Result<ExtractedDocument> {
        let mut open = self.open.clone();
        let _ = open.wait_for(|open| *open).await;
        Err(Error::UnsupportedFormat("gated test document".into()))
    }

    fn name(&self) -> &str {
        "gated"
    }
}

#[tokio::test]
async fn test_spreadsheet_completes_with_every_data_row() {
    let mut h = start(
        ExtractionRegistry::with_defaults(),
        MockGenerationBackend::new().failing("offline"),
    );
    let job_id = submit(&h, FileType::Xlsx, statement_xlsx(12)).await;

    let events = settle(&mut h.events, &job_id).await;
    assert!(matches!(events.last(), Some(WorkerEvent::JobCompleted { .. })));

    let job = h.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    let preview = job.state.preview().unwrap();
    assert_eq!(preview.row_count(), 12);
    assert_eq!(preview.head(5).len(), 5);
    assert_eq!(preview.columns[1].name, "Description");
    assert_eq!(h.queue.state_of(&job_id).await, None);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_image_only_pdf_completes_with_low_confidence() {
    let backend = MockGenerationBackend::new()
        .with_fixed_response(r#"{"transactions": [], "confidence_score": 0.1}"#);
    let mut h = start(ExtractionRegistry::with_defaults(), backend);
    let job_id = submit(&h, FileType::Pdf, image_only_pdf()).await;

    settle(&mut h.events, &job_id).await;

    let job = h.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    let preview = job.state.preview().unwrap();
    assert_eq!(preview.source, PreviewSource::Fallback);
    assert!(preview.confidence_score < AI_CONFIDENCE_THRESHOLD);
    assert!(preview.needs_review(AI_CONFIDENCE_THRESHOLD));
    assert!((0.0..=1.0).contains(&preview.confidence_score));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transient_failure_exhausts_after_max_attempts() {
    let flaky = Arc::new(FlakyAdapter {
        calls: AtomicU32::new(0),
    });
    let mut registry = ExtractionRegistry::new();
    registry.register(flaky.clone());
    let mut h = start(registry, MockGenerationBackend::new());
    let job_id = submit(&h, FileType::Pdf, b"%PDF-1.4".to_vec()).await;

    let events = settle(&mut h.events, &job_id).await;
    let retries = events
        .iter()
        .filter(|e| matches!(e, WorkerEvent::JobRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

    let job = h.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(
        job.state.failure().unwrap().code,
        FailureCode::RetriesExhausted
    );
    assert_eq!(h.queue.state_of(&job_id).await, Some(EntryState::Dead));
    assert_eq!(h.queue.attempts_of(&job_id).await, Some(3));
    assert_eq!(h.queue.payload_len_of(&job_id).await, Some(0));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreadable_upload_fails_without_retry() {
    let mut h = start(ExtractionRegistry::with_defaults(), MockGenerationBackend::new());
    let job_id = submit(&h, FileType::Pdf, b"GIF89a not a statement".to_vec()).await;

    let events = settle(&mut h.events, &job_id).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkerEvent::JobRetrying { .. })));

    let job = h.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(
        job.state.failure().unwrap().code,
        FailureCode::UnsupportedFormat
    );
    assert_eq!(h.queue.attempts_of(&job_id).await, Some(1));
    assert_eq!(h.queue.state_of(&job_id).await, Some(EntryState::Dead));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_message_for_expired_job_is_dropped() {
    let backend = MockGenerationBackend::new();
    let mut h = start(ExtractionRegistry::with_defaults(), backend);

    let job_id = JobId::generate();
    h.jobs.create(&job_id, FileType::Xlsx).await.unwrap();
    h.jobs.expire(&job_id).await.unwrap();
    h.queue
        .enqueue(
            QueueMessage::new(job_id.clone(), FileType::Xlsx, statement_xlsx(1), "a.xlsx", None),
            3,
        )
        .await
        .unwrap();

    let events = settle(&mut h.events, &job_id).await;
    assert!(matches!(events.last(), Some(WorkerEvent::JobSkipped { .. })));

    let job = h.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state.failure().unwrap().code, FailureCode::PaymentExpired);
    assert_eq!(h.queue.state_of(&job_id).await, None);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_the_loop() {
    let h = start(ExtractionRegistry::with_defaults(), MockGenerationBackend::new());
    let mut events = h.handle.events();
    h.handle.shutdown().await.unwrap();

    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(WorkerEvent::WorkerStopped) = events.recv().await {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(stopped);
}

#[tokio::test]
async fn test_job_timeout_is_retried_then_exhausted() {
    let stalled = Arc::new(StalledAdapter {
        calls: AtomicU32::new(0),
    });
    let mut registry = ExtractionRegistry::new();
    registry.register(stalled.clone());
    let mut h = start_with_config(
        registry,
        MockGenerationBackend::new(),
        WorkerConfig::default().with_job_timeout_secs(1),
    );
    let job_id = submit(&h, FileType::Pdf, b"%PDF-1.4".to_vec()).await;

    let events = settle(&mut h.events, &job_id).await;
    let retry_errors: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::JobRetrying { error, .. } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(retry_errors.len(), 2);
    assert!(retry_errors.iter().all(|e| e.contains("timeout")));
    assert_eq!(stalled.calls.load(Ordering::SeqCst), 3);

    let job = h.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(
        job.state.failure().unwrap().code,
        FailureCode::RetriesExhausted
    );
    assert_eq!(h.queue.state_of(&job_id).await, Some(EntryState::Dead));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_free_slot_is_refilled_while_slow_job_runs() {
    let (gate, open) = watch::channel(false);
    let mut registry = ExtractionRegistry::with_defaults();
    registry.register(Arc::new(GatedAdapter { open }));
    let mut h = start_with_config(
        registry,
        MockGenerationBackend::new().failing("offline"),
        WorkerConfig::default().with_max_concurrent(2),
    );

    let slow = submit(&h, FileType::Pdf, b"%PDF-1.4".to_vec()).await;
    let first = submit(&h, FileType::Xlsx, statement_xlsx(2)).await;
    settle(&mut h.events, &first).await;

    // The slow job still holds one slot; a later upload must not wait on it.
    let second = submit(&h, FileType::Xlsx, statement_xlsx(3)).await;
    let events = settle(&mut h.events, &second).await;
    assert!(matches!(events.last(), Some(WorkerEvent::JobCompleted { .. })));
    assert_eq!(
        h.jobs.get(&slow).await.unwrap().unwrap().status(),
        JobStatus::Processing
    );

    gate.send_replace(true);
    settle(&mut h.events, &slow).await;
    assert_eq!(
        h.jobs.get(&slow).await.unwrap().unwrap().status(),
        JobStatus::Failed
    );

    h.handle.shutdown().await.unwrap();
}
