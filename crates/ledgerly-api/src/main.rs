//! ledgerly-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledgerly_api::{build_router, AppConfig, AppState, StoreBackend};
use ledgerly_core::{GenerationBackend, JobStore, PaymentLedger, QueueClient, UnavailableBackend};
use ledgerly_db::{Database, MemoryJobStore, MemoryPaymentLedger, MemoryQueue};
use ledgerly_inference::{GeminiBackend, GeminiConfig, StatementStructurer, StructuringConfig};
use ledgerly_jobs::{
    ExtractionRegistry, RetryPolicy, StatementJobHandler, WorkerBuilder, WorkerConfig,
};

struct Stores {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn PaymentLedger>,
    queue: Arc<dyn QueueClient>,
    db: Option<Database>,
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            db.migrate().await.context("running migrations")?;
            info!("Database connected and migrated");
            Ok(Stores {
                jobs: db.jobs.clone(),
                ledger: db.payments.clone(),
                queue: db.queue.clone(),
                db: Some(db),
            })
        }
        StoreBackend::Memory => {
            warn!("Using in-memory stores; jobs and payments are lost on restart");
            Ok(Stores {
                jobs: Arc::new(MemoryJobStore::new()),
                ledger: Arc::new(MemoryPaymentLedger::new()),
                queue: Arc::new(MemoryQueue::new()),
                db: None,
            })
        }
    }
}

fn structuring_backend() -> anyhow::Result<Arc<dyn GenerationBackend>> {
    match GeminiConfig::from_env() {
        Some(gemini) => {
            let backend = GeminiBackend::new(gemini).context("creating Gemini client")?;
            info!(model = backend.model_name(), "Structuring backend configured");
            Ok(Arc::new(backend))
        }
        None => {
            warn!("GEMINI_API_KEY not set, every statement will use fallback structuring");
            Ok(Arc::new(UnavailableBackend))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - env filter (default: "ledgerly_api=debug,ledgerly_jobs=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledgerly_api=debug,ledgerly_jobs=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("ledgerly-api.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(file_dir, file_name));

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(log_ansi.unwrap_or(false)),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = AppConfig::from_env();
    let stores = open_stores(&config).await?;

    let structurer = Arc::new(StatementStructurer::with_config(
        structuring_backend()?,
        StructuringConfig::from_env(),
    ));
    let handler = StatementJobHandler::new(Arc::new(ExtractionRegistry::with_defaults()), structurer);
    let worker = WorkerBuilder::new(stores.jobs.clone(), stores.queue.clone())
        .with_config(WorkerConfig::from_env())
        .with_retry_policy(RetryPolicy::from_env().with_max_attempts(config.queue_max_attempts))
        .with_handler(handler)
        .build()?;
    let worker_handle = worker.start();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("parsing listen address")?;
    let state = AppState::new(
        config,
        stores.jobs.clone(),
        stores.ledger.clone(),
        stores.queue.clone(),
    );
    let app = build_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining worker");
    worker_handle.shutdown().await?;
    stores.queue.close().await?;
    if let Some(db) = stores.db {
        db.close().await;
    }
    info!("Shutdown complete");

    Ok(())
}
