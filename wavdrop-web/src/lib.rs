//! wavdrop-web library interface
//!
//! Audio upload service: decode up to five uploads to 16 kHz mono, store a
//! PCM WAV copy and a mel-spectrogram PNG of each in an object-storage bucket,
//! and report the public URLs. Exposed as a library for integration tests.

pub mod api;
pub mod audio;
pub mod driver;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod spectrogram;
pub mod storage;

pub use crate::error::{ApiError, ApiResult, PipelineError, PipelineResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wavdrop_common::config::{FailurePolicy, DEFAULT_MAX_UPLOAD_BYTES};
use wavdrop_common::events::EventBus;

use crate::driver::{Driver, DriverStateHandle};
use crate::pipeline::PipelineSettings;
use crate::storage::ObjectStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Bucket client, built once at startup
    pub store: Arc<dyn ObjectStore>,
    /// Batch driver; locked for the whole duration of a batch
    pub driver: Arc<Mutex<Driver>>,
    /// Driver state readable while a batch holds the lock
    pub driver_state: DriverStateHandle,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Scratch directories
    pub settings: Arc<PipelineSettings>,
    /// Request body limit for `/process`
    pub max_upload_bytes: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last pipeline error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        settings: PipelineSettings,
        policy: FailurePolicy,
        event_bus: EventBus,
    ) -> Self {
        let driver = Driver::new(policy);
        let driver_state = driver.state_handle();
        Self {
            store,
            driver: Arc::new(Mutex::new(driver)),
            driver_state,
            event_bus,
            settings: Arc::new(settings),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let body_limit = state.max_upload_bytes;

    Router::new()
        // UI routes (page + static assets)
        .merge(api::ui_routes())
        // API routes
        .merge(api::process_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
