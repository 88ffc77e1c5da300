//! Batch trigger endpoint
//!
//! `POST /process` takes a multipart form with up to five file fields named
//! `file0`..`file4`, stages them and runs the batch to completion before
//! responding. The response is the `BatchReport`, including for the
//! "nothing staged" and "aborted" outcomes.

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::driver::{BatchOutcome, BatchReport, Driver, StagedFile};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Multipart field name prefix for upload slots
pub const FILE_FIELD_PREFIX: &str = "file";

/// POST /process
pub async fn process_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<BatchReport>> {
    // Reject a second trigger immediately instead of queueing it
    let mut driver = Arc::clone(&state.driver)
        .try_lock_owned()
        .map_err(|_| ApiError::Conflict("A batch is already processing".to_string()))?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let Some(slot) = field.name().and_then(parse_slot) else {
            debug!(field = ?field.name(), "Ignoring non-file form field");
            continue;
        };
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;

        // An untouched file input submits an empty, unnamed part
        if file_name.is_empty() && bytes.is_empty() {
            continue;
        }

        let staged = StagedFile::new(slot, file_name, bytes.to_vec())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        files.push(staged);
    }

    driver
        .stage(files)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // The batch owns its task: a client that disconnects does not cancel it
    let report = tokio::spawn(run_batch(driver, state))
        .await
        .map_err(|e| ApiError::Internal(format!("Batch task failed: {}", e)))?;

    info!(
        batch_id = ?report.batch_id,
        urls = report.public_urls().len(),
        "Process request finished"
    );
    Ok(Json(report))
}

async fn run_batch(mut driver: OwnedMutexGuard<Driver>, state: AppState) -> BatchReport {
    let report = driver
        .run(state.store.as_ref(), &state.settings, &state.event_bus)
        .await;
    drop(driver);

    if let Some(error) = first_error(&report) {
        *state.last_error.write().await = Some(error);
    }
    report
}

/// `file3` → slot 3
pub fn parse_slot(field_name: &str) -> Option<usize> {
    field_name
        .strip_prefix(FILE_FIELD_PREFIX)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

fn first_error(report: &BatchReport) -> Option<String> {
    if let BatchOutcome::Aborted {
        failed_file, error, ..
    } = &report.outcome
    {
        return Some(format!("{}: {}", failed_file, error));
    }
    report
        .files
        .iter()
        .find_map(|f| f.error.as_ref().map(|e| format!("{}: {}", f.name, e)))
}

/// Build batch trigger routes
pub fn process_routes() -> Router<AppState> {
    Router::new().route("/process", post(process_batch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slot() {
        assert_eq!(parse_slot("file0"), Some(0));
        assert_eq!(parse_slot("file4"), Some(4));
        assert_eq!(parse_slot("file12"), Some(12));
        assert_eq!(parse_slot("file"), None);
        assert_eq!(parse_slot("file-1"), None);
        assert_eq!(parse_slot("upload0"), None);
    }
}
