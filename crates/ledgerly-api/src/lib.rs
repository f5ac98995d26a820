//! # ledgerly-api
//!
//! HTTP surface of ledgerly: statement upload, preview polling, checkout,
//! payment webhooks and the payment-gated download.
//!
//! [`build_router`] assembles the routes and middleware over an
//! [`AppState`]; the binary in `main.rs` owns process lifecycle.

pub mod config;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

pub use config::{AppConfig, StoreBackend};
pub use error::ApiError;
pub use state::AppState;

/// Multipart framing allowance on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Transport body limit. Twice the file limit, so moderately oversized
/// uploads still reach the handler and get a sized `FILE_TOO_LARGE`.
pub fn body_limit(max_file_size: usize) -> usize {
    max_file_size
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD_BYTES)
}

pub fn build_router(state: AppState) -> Router {
    let limit = body_limit(state.config.max_file_size);
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.config.cors_origins()))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/upload", post(handlers::upload::upload_statement))
        .route("/api/preview/:job_id", get(handlers::preview::get_preview))
        .route(
            "/api/download/:job_id",
            get(handlers::download::download_statement),
        )
        .route("/api/checkout", post(handlers::checkout::begin_checkout))
        .route(
            "/api/webhooks/stripe",
            post(handlers::webhooks::stripe_webhook),
        )
        .route(
            "/api/webhooks/xendit",
            post(handlers::webhooks::xendit_webhook),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors)
        .layer(DefaultBodyLimit::max(limit))
        .layer(RequestBodyLimitLayer::new(limit))
        .with_state(state)
}
