//! Spectrogram rendering and upload

use std::sync::Arc;

use tracing::info;
use wavdrop_common::events::ArtifactKind;

use super::{ensure_dir, upload_artifact, Artifact, PipelineSettings};
use crate::audio::Waveform;
use crate::error::{PipelineError, PipelineResult};
use crate::naming::ArtifactNames;
use crate::spectrogram;
use crate::storage::ObjectStore;

/// Render the mel-spectrogram of `waveform`, save it as
/// `<spectrogram_dir>/<base>.png` and upload it to `spectrograms/<base>.png`
///
/// The figure title is the sanitized file name.
pub async fn render_spectrogram_and_upload(
    store: &dyn ObjectStore,
    settings: &PipelineSettings,
    waveform: &Arc<Waveform>,
    names: &ArtifactNames,
) -> PipelineResult<Artifact> {
    let title = names.sanitized.clone();
    let waveform = Arc::clone(waveform);
    let png =
        tokio::task::spawn_blocking(move || spectrogram::spectrogram_png(&waveform, &title))
            .await??;

    ensure_dir(&settings.spectrogram_dir).await?;
    let local_path = settings.spectrogram_dir.join(&names.png_name);
    tokio::fs::write(&local_path, &png)
        .await
        .map_err(|e| PipelineError::io(&local_path, e))?;

    let artifact =
        upload_artifact(store, ArtifactKind::Spectrogram, local_path, &names.png_key).await?;

    info!(
        file_name = %names.original,
        key = %artifact.key,
        url = %artifact.public_url,
        "Spectrogram uploaded"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serial_test::serial;

    #[tokio::test]
    #[serial(figures)]
    async fn test_renders_and_uploads_png() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = PipelineSettings {
            audio_dir: tmp.path().join("a"),
            spectrogram_dir: tmp.path().join("s"),
        };
        let store = MemoryStore::new("my-audio-bucket");
        let names = ArtifactNames::for_upload("test clip.wav");
        let waveform = Arc::new(Waveform {
            samples: (0..16_000)
                .map(|i| (2.0 * std::f32::consts::PI * 880.0 * i as f32 / 16_000.0).sin())
                .collect(),
            sample_rate: 16_000,
        });

        let artifact = render_spectrogram_and_upload(&store, &settings, &waveform, &names)
            .await
            .unwrap();

        assert_eq!(artifact.kind, ArtifactKind::Spectrogram);
        assert_eq!(artifact.key, "spectrograms/processed_test_clip.png");
        assert_eq!(
            artifact.local_path,
            tmp.path().join("s").join("processed_test_clip.png")
        );
        let stored = store.get("spectrograms/processed_test_clip.png").unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(&stored.bytes[1..4], b"PNG");
        assert_eq!(spectrogram::live_figures(), 0);
    }
}
