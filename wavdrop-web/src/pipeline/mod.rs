//! Per-file processing steps
//!
//! For one upload, in order:
//! 1. [`ingest`]: decode and resample to a 16 kHz mono [`Waveform`]
//! 2. [`save_wav_and_upload`]: PCM WAV copy to `audio/<sanitized>`
//! 3. [`render_spectrogram_and_upload`]: mel-spectrogram PNG to
//!    `spectrograms/<base>.png`
//!
//! CPU-bound work runs on the blocking pool. Each step returns its error as a
//! value; nothing here decides whether a batch continues.

pub mod spectrogram_upload;
pub mod wav_upload;

pub use spectrogram_upload::render_spectrogram_and_upload;
pub use wav_upload::save_wav_and_upload;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use wavdrop_common::config::ScratchConfig;
use wavdrop_common::events::ArtifactKind;

use crate::audio::{self, AudioFormat, Waveform};
use crate::error::{PipelineError, PipelineResult};
use crate::storage::ObjectStore;

/// Local scratch locations for written artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub audio_dir: PathBuf,
    pub spectrogram_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(scratch: &ScratchConfig) -> Self {
        Self {
            audio_dir: scratch.audio_dir.clone(),
            spectrogram_dir: scratch.spectrogram_dir.clone(),
        }
    }
}

/// One uploaded artifact; the local file stays on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub local_path: PathBuf,
    pub key: String,
    pub public_url: String,
}

/// Decode an upload into a shared 16 kHz mono waveform
pub async fn ingest(bytes: Vec<u8>, format: AudioFormat) -> PipelineResult<Arc<Waveform>> {
    let waveform = tokio::task::spawn_blocking(move || audio::load_waveform(bytes, format)).await??;
    Ok(Arc::new(waveform))
}

/// Upload a finished local file and resolve its public URL
pub(crate) async fn upload_artifact(
    store: &dyn ObjectStore,
    kind: ArtifactKind,
    local_path: PathBuf,
    key: &str,
) -> PipelineResult<Artifact> {
    let bytes = tokio::fs::read(&local_path)
        .await
        .map_err(|e| PipelineError::io(&local_path, e))?;

    debug!(key = %key, bytes = bytes.len(), kind = kind.label(), "Uploading artifact");

    store.upload(key, bytes, kind.content_type()).await?;
    let public_url = store.public_url(key)?;

    Ok(Artifact {
        kind,
        local_path,
        key: key.to_string(),
        public_url: public_url.to_string(),
    })
}

/// `create_dir_all`, mapped to a pipeline error naming the directory
pub(crate) async fn ensure_dir(dir: &std::path::Path) -> PipelineResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))
}
