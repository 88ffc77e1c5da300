//! WAV persistence and upload

use std::sync::Arc;

use tracing::info;
use wavdrop_common::events::ArtifactKind;

use super::{ensure_dir, upload_artifact, Artifact, PipelineSettings};
use crate::audio::{write_wav, Waveform};
use crate::error::PipelineResult;
use crate::naming::ArtifactNames;
use crate::storage::ObjectStore;

/// Write `waveform` as `<audio_dir>/<sanitized>` and upload it to
/// `audio/<sanitized>`
///
/// The scratch directory is created if missing. The bytes uploaded are the
/// bytes read back from the written file.
pub async fn save_wav_and_upload(
    store: &dyn ObjectStore,
    settings: &PipelineSettings,
    waveform: &Arc<Waveform>,
    names: &ArtifactNames,
) -> PipelineResult<Artifact> {
    ensure_dir(&settings.audio_dir).await?;

    let local_path = settings.audio_dir.join(&names.sanitized);
    let path = local_path.clone();
    let waveform = Arc::clone(waveform);
    tokio::task::spawn_blocking(move || write_wav(&path, &waveform)).await??;

    let artifact =
        upload_artifact(store, ArtifactKind::Audio, local_path, &names.wav_key).await?;

    info!(
        file_name = %names.original,
        key = %artifact.key,
        url = %artifact.public_url,
        "Audio uploaded"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{decode_bytes, AudioFormat};
    use crate::error::PipelineError;
    use crate::storage::{MemoryStore, StorageError};

    fn settings_in(dir: &std::path::Path) -> PipelineSettings {
        PipelineSettings {
            audio_dir: dir.join("temp_audio"),
            spectrogram_dir: dir.join("temp_spectrograms"),
        }
    }

    fn half_second_tone() -> Arc<Waveform> {
        Arc::new(Waveform {
            samples: (0..8_000)
                .map(|i| 0.25 * (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 16_000.0).sin())
                .collect(),
            sample_rate: 16_000,
        })
    }

    #[tokio::test]
    async fn test_writes_and_uploads_wav() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let store = MemoryStore::new("my-audio-bucket");
        let names = ArtifactNames::for_upload("test clip.wav");

        let artifact = save_wav_and_upload(&store, &settings, &half_second_tone(), &names)
            .await
            .unwrap();

        assert_eq!(artifact.kind, ArtifactKind::Audio);
        assert_eq!(artifact.key, "audio/processed_test_clip.wav");
        assert_eq!(
            artifact.local_path,
            tmp.path().join("temp_audio").join("processed_test_clip.wav")
        );
        assert!(artifact.public_url.ends_with("/my-audio-bucket/audio/processed_test_clip.wav"));

        let stored = store.get("audio/processed_test_clip.wav").unwrap();
        assert_eq!(stored.content_type, "audio/wav");
        assert_eq!(stored.bytes, std::fs::read(&artifact.local_path).unwrap());

        let decoded = decode_bytes(stored.bytes, AudioFormat::Wav).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), 8_000);
    }

    #[tokio::test]
    async fn test_existing_scratch_dir_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        std::fs::create_dir_all(&settings.audio_dir).unwrap();
        let store = MemoryStore::new("b");

        let names = ArtifactNames::for_upload("a.wav");
        assert!(save_wav_and_upload(&store, &settings, &half_second_tone(), &names)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_key_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let store = MemoryStore::new("b");
        let names = ArtifactNames::for_upload("a.wav");
        let waveform = half_second_tone();

        save_wav_and_upload(&store, &settings, &waveform, &names)
            .await
            .unwrap();
        let second = save_wav_and_upload(&store, &settings, &waveform, &names).await;
        assert!(matches!(
            second,
            Err(PipelineError::Storage(StorageError::Duplicate(_)))
        ));
    }

    #[tokio::test]
    async fn test_unwritable_scratch_dir_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = tmp.path().join("temp_audio");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let settings = settings_in(tmp.path());
        let store = MemoryStore::new("b");

        let names = ArtifactNames::for_upload("a.wav");
        let result = save_wav_and_upload(&store, &settings, &half_second_tone(), &names).await;
        assert!(matches!(result, Err(PipelineError::Io { .. })));
        assert_eq!(store.call_count(), 0);
    }
}
