//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::driver::{read_state, DriverState};
use crate::AppState;

/// Build identification baked in by build.rs
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub build_profile: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            git_hash: env!("GIT_HASH"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
            build_profile: env!("BUILD_PROFILE"),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded" after a pipeline error)
    pub status: String,
    /// Module name ("wavdrop-web")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub build: BuildInfo,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Object storage backend ("supabase" or "memory")
    pub storage_backend: String,
    pub bucket: String,
    pub driver: DriverState,
    /// Last pipeline error if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();
    let status = if last_error.is_some() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "wavdrop-web".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: BuildInfo::current(),
        uptime_seconds,
        storage_backend: state.store.backend().to_string(),
        bucket: state.store.bucket().to_string(),
        driver: read_state(&state.driver_state),
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
