//! Error types for wavdrop-web
//!
//! Two layers:
//! - [`PipelineError`]: failures while ingesting, persisting, rendering or
//!   uploading one file. Returned as values; the batch driver decides whether
//!   the rest of the batch continues.
//! - [`ApiError`]: HTTP-facing errors rendered as JSON.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

use crate::storage::StorageError;

/// Per-file pipeline failure
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unreadable, corrupt or unsupported audio
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sample-rate conversion failed
    #[error("Resample error: {0}")]
    Resample(String),

    /// Local directory or file operation failed
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// WAV encoding failed
    #[error("WAV encode error: {0}")]
    Wav(#[from] hound::Error),

    /// Spectrogram rasterization or PNG encoding failed
    #[error("Render error: {0}")]
    Render(String),

    /// Remote object storage rejected or failed the request
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blocking worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short category used in reports
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) | PipelineError::Resample(_) => "decode",
            PipelineError::Io { .. } | PipelineError::Wav(_) | PipelineError::Render(_) => {
                "local_io"
            }
            PipelineError::Storage(_) => "remote",
            PipelineError::Task(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task(err.to_string())
    }
}

/// Result type for pipeline steps
pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - a batch is already processing
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500) - the batch task failed to join
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
