//! Batch driver
//!
//! State machine behind the "Process & Upload" button:
//!
//! ```text
//! Idle ──stage(1..=5)──▶ FilesStaged ──run──▶ Processing ──done──▶ Idle
//!   ▲                                                               │
//!   └──────────────── run with nothing staged (warning) ────────────┘
//! ```
//!
//! Files are processed one at a time in slot order. Within a file the steps
//! are ingest, WAV upload, spectrogram upload. What happens after a failing
//! file is decided by [`FailurePolicy`].

use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wavdrop_common::config::FailurePolicy;
use wavdrop_common::events::{EventBus, WavdropEvent};

use crate::audio::AudioFormat;
use crate::error::PipelineResult;
use crate::naming::{validate_upload_name, ArtifactNames};
use crate::pipeline::{self, Artifact, PipelineSettings};
use crate::storage::ObjectStore;

/// Number of upload slots on the page
pub const MAX_STAGED_FILES: usize = 5;

pub const NO_FILES_WARNING: &str = "No files uploaded!";
pub const ALL_COMPLETE_MESSAGE: &str = "All uploads complete!";

/// An uploaded file held for the duration of one request
#[derive(Clone)]
pub struct StagedFile {
    /// 0-based upload slot on the page
    pub slot: usize,
    pub name: String,
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    /// Validate the name and derive the format from its extension
    pub fn new(slot: usize, name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, StageError> {
        let name = name.into();
        validate_upload_name(&name).map_err(StageError::InvalidName)?;
        let format = AudioFormat::from_file_name(&name)
            .ok_or_else(|| StageError::UnsupportedFormat(name.clone()))?;
        Ok(Self {
            slot,
            name,
            format,
            bytes,
        })
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("slot", &self.slot)
            .field("name", &self.name)
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Staging rejections
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("Too many files: {count} staged, at most {max} allowed")]
    TooManyFiles { count: usize, max: usize },

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Unsupported file type: {0} (accepted: wav, mp3, ogg)")]
    UnsupportedFormat(String),

    #[error("Upload slot {0} used twice")]
    DuplicateSlot(usize),

    #[error("Upload slot {slot} does not exist (slots 0..{max})")]
    UnknownSlot { slot: usize, max: usize },
}

/// Driver state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    FilesStaged {
        count: usize,
    },
    Processing {
        batch_id: Uuid,
        /// File currently in the pipeline
        current: Option<String>,
    },
}

/// Severity of one status line, mirrored by the page's styling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One line of batch output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusLine {
    fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    Failed,
    /// Never attempted because an earlier file aborted the batch
    NotAttempted,
}

/// Per-file result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub name: String,
    pub status: FileStatus,
    pub audio: Option<Artifact>,
    pub spectrogram: Option<Artifact>,
    pub error: Option<String>,
}

impl FileReport {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: FileStatus::NotAttempted,
            audio: None,
            spectrogram: None,
            error: None,
        }
    }
}

/// How a trigger press ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Nothing was staged; no bucket calls were made
    NoFiles,
    /// Every staged file was attempted
    Completed {
        files_processed: usize,
        files_failed: usize,
    },
    /// Stopped at `failed_file`; `unattempted` were never started
    Aborted {
        failed_file: String,
        error: String,
        unattempted: Vec<String>,
    },
}

/// Everything one trigger press produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: Option<Uuid>,
    pub outcome: BatchOutcome,
    pub files: Vec<FileReport>,
    pub lines: Vec<StatusLine>,
}

impl BatchReport {
    /// Every public URL produced, audio before spectrogram per file
    pub fn public_urls(&self) -> Vec<&str> {
        self.files
            .iter()
            .flat_map(|f| [f.audio.as_ref(), f.spectrogram.as_ref()])
            .flatten()
            .map(|a| a.public_url.as_str())
            .collect()
    }
}

/// Shared read-only view of the driver state
pub type DriverStateHandle = Arc<RwLock<DriverState>>;

/// Batch driver
///
/// Owned behind a `tokio::sync::Mutex`; `run` holds it for the whole batch so
/// only one batch runs at a time.
pub struct Driver {
    policy: FailurePolicy,
    staged: Vec<StagedFile>,
    state: DriverStateHandle,
}

impl Driver {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            staged: Vec::new(),
            state: Arc::new(RwLock::new(DriverState::Idle)),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Current state
    pub fn state(&self) -> DriverState {
        read_state(&self.state)
    }

    /// Handle for readers that must not wait on a running batch
    pub fn state_handle(&self) -> DriverStateHandle {
        Arc::clone(&self.state)
    }

    /// Replace the staged set
    ///
    /// No files leaves the driver `Idle`. Files are ordered by slot.
    pub fn stage(&mut self, mut files: Vec<StagedFile>) -> Result<DriverState, StageError> {
        if files.len() > MAX_STAGED_FILES {
            return Err(StageError::TooManyFiles {
                count: files.len(),
                max: MAX_STAGED_FILES,
            });
        }

        if let Some(file) = files.iter().find(|f| f.slot >= MAX_STAGED_FILES) {
            return Err(StageError::UnknownSlot {
                slot: file.slot,
                max: MAX_STAGED_FILES,
            });
        }

        files.sort_by_key(|f| f.slot);
        if let Some(pair) = files.windows(2).find(|w| w[0].slot == w[1].slot) {
            return Err(StageError::DuplicateSlot(pair[0].slot));
        }

        let next = if files.is_empty() {
            DriverState::Idle
        } else {
            DriverState::FilesStaged { count: files.len() }
        };
        self.staged = files;
        self.set_state(next.clone());
        Ok(next)
    }

    /// Process everything staged, then return to `Idle`
    pub async fn run(
        &mut self,
        store: &dyn ObjectStore,
        settings: &PipelineSettings,
        events: &EventBus,
    ) -> BatchReport {
        let files = std::mem::take(&mut self.staged);

        if files.is_empty() {
            warn!("Process triggered with no files staged");
            events.emit_lossy(WavdropEvent::NoFilesStaged {
                timestamp: Utc::now(),
            });
            self.set_state(DriverState::Idle);
            return BatchReport {
                batch_id: None,
                outcome: BatchOutcome::NoFiles,
                files: Vec::new(),
                lines: vec![StatusLine::new(StatusLevel::Warning, NO_FILES_WARNING)],
            };
        }

        let batch_id = Uuid::new_v4();
        self.set_state(DriverState::Processing {
            batch_id,
            current: None,
        });
        // Back to Idle on return, or if this future is dropped mid-batch
        let _idle = ResetOnDrop(self.state_handle());
        info!(%batch_id, file_count = files.len(), policy = ?self.policy, "Batch started");
        match events.emit(WavdropEvent::BatchStarted {
            batch_id,
            file_count: files.len(),
            timestamp: Utc::now(),
        }) {
            Ok(listeners) => debug!(%batch_id, listeners, "Progress streamed to listeners"),
            Err(_) => debug!(%batch_id, "No progress listeners connected"),
        }

        let mut run = BatchRun {
            batch_id,
            store,
            settings,
            events,
            lines: Vec::new(),
        };
        let mut reports: Vec<FileReport> = Vec::with_capacity(files.len());
        let mut abort: Option<(String, String)> = None;
        let mut files_failed = 0;

        let mut queue = files.into_iter().enumerate();
        for (index, file) in queue.by_ref() {
            self.set_state(DriverState::Processing {
                batch_id,
                current: Some(file.name.clone()),
            });

            let mut report = FileReport::pending(&file.name);
            match run.process(index, file, &mut report).await {
                Ok(()) => report.status = FileStatus::Uploaded,
                Err(err) => {
                    let message = err.to_string();
                    error!(
                        %batch_id,
                        file_name = %report.name,
                        category = err.category(),
                        error = %message,
                        "File failed"
                    );
                    run.events.emit_lossy(WavdropEvent::FileFailed {
                        batch_id,
                        file_name: report.name.clone(),
                        error: message.clone(),
                        timestamp: Utc::now(),
                    });
                    run.lines.push(StatusLine::new(
                        StatusLevel::Error,
                        format!("Error processing {}: {}", report.name, message),
                    ));

                    report.status = FileStatus::Failed;
                    report.error = Some(message.clone());
                    files_failed += 1;

                    if self.policy == FailurePolicy::AbortBatch {
                        abort = Some((report.name.clone(), message));
                        reports.push(report);
                        break;
                    }
                }
            }
            reports.push(report);
        }

        let outcome = match abort {
            Some((failed_file, error)) => {
                let unattempted: Vec<String> = queue.map(|(_, f)| f.name).collect();
                reports.extend(unattempted.iter().map(|name| FileReport::pending(name)));
                warn!(
                    %batch_id,
                    failed_file = %failed_file,
                    unattempted = unattempted.len(),
                    "Batch aborted"
                );
                events.emit_lossy(WavdropEvent::BatchAborted {
                    batch_id,
                    failed_file: failed_file.clone(),
                    error: error.clone(),
                    unattempted: unattempted.clone(),
                    timestamp: Utc::now(),
                });
                BatchOutcome::Aborted {
                    failed_file,
                    error,
                    unattempted,
                }
            }
            None => {
                let files_processed = reports.len() - files_failed;
                if files_failed == 0 {
                    run.lines
                        .push(StatusLine::new(StatusLevel::Success, ALL_COMPLETE_MESSAGE));
                } else {
                    run.lines.push(StatusLine::new(
                        StatusLevel::Warning,
                        format!(
                            "Uploads finished: {} succeeded, {} failed",
                            files_processed, files_failed
                        ),
                    ));
                }
                info!(%batch_id, files_processed, files_failed, "Batch completed");
                events.emit_lossy(WavdropEvent::BatchCompleted {
                    batch_id,
                    files_processed,
                    files_failed,
                    timestamp: Utc::now(),
                });
                BatchOutcome::Completed {
                    files_processed,
                    files_failed,
                }
            }
        };

        BatchReport {
            batch_id: Some(batch_id),
            outcome,
            files: reports,
            lines: run.lines,
        }
    }

    fn set_state(&self, next: DriverState) {
        write_state(&self.state, next);
    }
}

fn write_state(handle: &DriverStateHandle, next: DriverState) {
    match handle.write() {
        Ok(mut state) => *state = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

struct ResetOnDrop(DriverStateHandle);

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        write_state(&self.0, DriverState::Idle);
    }
}

/// Read a state handle, tolerating a poisoned lock
pub fn read_state(handle: &DriverStateHandle) -> DriverState {
    match handle.read() {
        Ok(state) => state.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Per-batch context threaded through the file loop
struct BatchRun<'a> {
    batch_id: Uuid,
    store: &'a dyn ObjectStore,
    settings: &'a PipelineSettings,
    events: &'a EventBus,
    lines: Vec<StatusLine>,
}

impl BatchRun<'_> {
    async fn process(
        &mut self,
        index: usize,
        file: StagedFile,
        report: &mut FileReport,
    ) -> PipelineResult<()> {
        info!(batch_id = %self.batch_id, index, file_name = %file.name, "Processing file");
        self.lines.push(StatusLine::new(
            StatusLevel::Info,
            format!("Processing: {}", file.name),
        ));
        self.events.emit_lossy(WavdropEvent::FileStarted {
            batch_id: self.batch_id,
            index,
            file_name: file.name.clone(),
            timestamp: Utc::now(),
        });

        let names = ArtifactNames::for_upload(&file.name);
        let waveform = pipeline::ingest(file.bytes, file.format).await?;

        let audio =
            pipeline::save_wav_and_upload(self.store, self.settings, &waveform, &names).await?;
        self.announce(&names, &audio);
        report.audio = Some(audio);

        let spectrogram =
            pipeline::render_spectrogram_and_upload(self.store, self.settings, &waveform, &names)
                .await?;
        self.announce(&names, &spectrogram);
        report.spectrogram = Some(spectrogram);

        Ok(())
    }

    fn announce(&mut self, names: &ArtifactNames, artifact: &Artifact) {
        self.lines.push(StatusLine::new(
            StatusLevel::Info,
            format!(
                " - Uploaded {} URL: {}",
                artifact.kind.label(),
                artifact.public_url
            ),
        ));
        self.events.emit_lossy(WavdropEvent::ArtifactUploaded {
            batch_id: self.batch_id,
            file_name: names.original.clone(),
            kind: artifact.kind,
            key: artifact.key.clone(),
            public_url: artifact.public_url.clone(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError, UploadReceipt};
    use crate::test_support::{sine_wav_bytes, WavFixture};
    use serial_test::serial;

    fn settings_in(dir: &std::path::Path) -> PipelineSettings {
        PipelineSettings {
            audio_dir: dir.join("temp_audio"),
            spectrogram_dir: dir.join("temp_spectrograms"),
        }
    }

    fn wav(slot: usize, name: &str) -> StagedFile {
        StagedFile::new(
            slot,
            name,
            sine_wav_bytes(&WavFixture {
                seconds: 0.25,
                ..Default::default()
            }),
        )
        .unwrap()
    }

    fn corrupt(slot: usize, name: &str) -> StagedFile {
        StagedFile::new(slot, name, b"RIFF\0\0\0\0garbage".to_vec()).unwrap()
    }

    fn texts(report: &BatchReport) -> Vec<&str> {
        report.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_staged_file_validation() {
        assert_eq!(
            StagedFile::new(0, "song.flac", vec![]).unwrap_err(),
            StageError::UnsupportedFormat("song.flac".to_string())
        );
        assert!(matches!(
            StagedFile::new(0, "../x.wav", vec![]),
            Err(StageError::InvalidName(_))
        ));
        assert_eq!(StagedFile::new(3, "A.OGG", vec![]).unwrap().format, AudioFormat::Ogg);
    }

    #[test]
    fn test_stage_transitions() {
        let mut driver = Driver::new(FailurePolicy::AbortBatch);
        assert_eq!(driver.state(), DriverState::Idle);

        assert_eq!(driver.stage(Vec::new()).unwrap(), DriverState::Idle);

        let state = driver.stage(vec![wav(0, "a.wav"), wav(1, "b.wav")]).unwrap();
        assert_eq!(state, DriverState::FilesStaged { count: 2 });
        assert_eq!(driver.state(), DriverState::FilesStaged { count: 2 });
    }

    #[test]
    fn test_stage_rejects_more_than_five() {
        let mut driver = Driver::new(FailurePolicy::AbortBatch);
        let files: Vec<StagedFile> = (0..6).map(|i| wav(i, &format!("f{}.wav", i))).collect();
        assert_eq!(
            driver.stage(files).unwrap_err(),
            StageError::TooManyFiles { count: 6, max: 5 }
        );
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[test]
    fn test_stage_orders_by_slot_and_rejects_duplicates() {
        let mut driver = Driver::new(FailurePolicy::AbortBatch);
        driver.stage(vec![wav(4, "late.wav"), wav(1, "early.wav")]).unwrap();
        let names: Vec<&str> = driver.staged.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["early.wav", "late.wav"]);

        assert_eq!(
            driver.stage(vec![wav(2, "a.wav"), wav(2, "b.wav")]).unwrap_err(),
            StageError::DuplicateSlot(2)
        );
    }

    #[test]
    fn test_stage_rejects_slot_past_the_page() {
        let mut driver = Driver::new(FailurePolicy::AbortBatch);
        assert_eq!(
            driver.stage(vec![wav(12, "a.wav")]).unwrap_err(),
            StageError::UnknownSlot { slot: 12, max: 5 }
        );
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.stage(vec![wav(4, "a.wav")]).is_ok());
    }

    #[tokio::test]
    async fn test_no_files_warns_without_store_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("b");
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let mut driver = Driver::new(FailurePolicy::AbortBatch);

        let report = driver.run(&store, &settings_in(tmp.path()), &events).await;

        assert_eq!(report.outcome, BatchOutcome::NoFiles);
        assert_eq!(texts(&report), vec![NO_FILES_WARNING]);
        assert_eq!(report.lines[0].level, StatusLevel::Warning);
        assert_eq!(store.call_count(), 0);
        assert!(!tmp.path().join("temp_audio").exists());
        assert!(matches!(rx.try_recv().unwrap(), WavdropEvent::NoFilesStaged { .. }));
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[tokio::test]
    #[serial(figures)]
    async fn test_single_file_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("my-audio-bucket");
        let events = EventBus::new(64);
        let mut driver = Driver::new(FailurePolicy::AbortBatch);

        driver.stage(vec![wav(0, "test clip.wav")]).unwrap();
        let report = driver.run(&store, &settings_in(tmp.path()), &events).await;

        assert_eq!(
            report.outcome,
            BatchOutcome::Completed {
                files_processed: 1,
                files_failed: 0
            }
        );
        assert_eq!(
            store.keys(),
            vec![
                "audio/processed_test_clip.wav".to_string(),
                "spectrograms/processed_test_clip.png".to_string(),
            ]
        );

        let urls = report.public_urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("/my-audio-bucket/audio/processed_test_clip.wav"));
        assert!(urls[1].ends_with("/my-audio-bucket/spectrograms/processed_test_clip.png"));

        let lines = texts(&report);
        assert_eq!(lines[0], "Processing: test clip.wav");
        assert_eq!(lines[1], format!(" - Uploaded Audio URL: {}", urls[0]));
        assert_eq!(lines[2], format!(" - Uploaded Spectrogram URL: {}", urls[1]));
        assert_eq!(lines[3], ALL_COMPLETE_MESSAGE);
        assert_eq!(driver.state(), DriverState::Idle);
        assert_eq!(crate::spectrogram::live_figures(), 0);
    }

    #[tokio::test]
    #[serial(figures)]
    async fn test_corrupt_file_aborts_remaining() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("b");
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let mut driver = Driver::new(FailurePolicy::AbortBatch);

        driver
            .stage(vec![
                wav(0, "first.wav"),
                corrupt(1, "broken.wav"),
                wav(2, "third.wav"),
            ])
            .unwrap();
        let report = driver.run(&store, &settings_in(tmp.path()), &events).await;

        match &report.outcome {
            BatchOutcome::Aborted {
                failed_file,
                unattempted,
                ..
            } => {
                assert_eq!(failed_file, "broken.wav");
                assert_eq!(unattempted, &vec!["third.wav".to_string()]);
            }
            other => panic!("expected abort, got {:?}", other),
        }

        // Only the first file reached the bucket
        assert_eq!(
            store.keys(),
            vec![
                "audio/processed_first.wav".to_string(),
                "spectrograms/processed_first.png".to_string(),
            ]
        );
        assert_eq!(report.files[1].status, FileStatus::Failed);
        assert!(report.files[1].audio.is_none());
        assert_eq!(report.files[2].status, FileStatus::NotAttempted);
        assert!(!texts(&report).contains(&ALL_COMPLETE_MESSAGE));
        assert!(!texts(&report).contains(&"Processing: third.wav"));
        assert_eq!(driver.state(), DriverState::Idle);

        assert!(matches!(
            rx.try_recv().unwrap(),
            WavdropEvent::BatchStarted { file_count: 3, .. }
        ));
        let mut saw_abort = false;
        while let Ok(event) = rx.try_recv() {
            if let WavdropEvent::BatchAborted { failed_file, .. } = event {
                assert_eq!(failed_file, "broken.wav");
                saw_abort = true;
            }
        }
        assert!(saw_abort);
    }

    #[tokio::test]
    #[serial(figures)]
    async fn test_skip_policy_continues_after_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("b");
        let events = EventBus::new(64);
        let mut driver = Driver::new(FailurePolicy::SkipFile);

        driver
            .stage(vec![corrupt(0, "broken.mp3"), wav(1, "good.wav")])
            .unwrap();
        let report = driver.run(&store, &settings_in(tmp.path()), &events).await;

        assert_eq!(
            report.outcome,
            BatchOutcome::Completed {
                files_processed: 1,
                files_failed: 1
            }
        );
        assert_eq!(report.public_urls().len(), 2);
        assert!(report.lines.iter().any(|l| l.level == StatusLevel::Error));
        assert!(!texts(&report).contains(&ALL_COMPLETE_MESSAGE));
    }

    #[tokio::test]
    #[serial(figures)]
    async fn test_duplicate_name_in_second_batch_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("b");
        let events = EventBus::new(64);
        let settings = settings_in(tmp.path());
        let mut driver = Driver::new(FailurePolicy::AbortBatch);

        driver.stage(vec![wav(0, "same name.wav")]).unwrap();
        driver.run(&store, &settings, &events).await;

        driver.stage(vec![wav(0, "same_name.wav")]).unwrap();
        let report = driver.run(&store, &settings, &events).await;
        assert!(matches!(report.outcome, BatchOutcome::Aborted { .. }));
        assert!(report.files[0]
            .error
            .as_deref()
            .unwrap()
            .contains("already exists"));
    }

    #[tokio::test]
    #[serial(figures)]
    async fn test_same_name_twice_in_one_batch_rejects_second() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("b");
        let events = EventBus::new(64);
        let mut driver = Driver::new(FailurePolicy::AbortBatch);

        // Both sanitize to processed_a_b.wav
        driver
            .stage(vec![wav(0, "a b.wav"), wav(1, "a_b.wav")])
            .unwrap();
        let report = driver.run(&store, &settings_in(tmp.path()), &events).await;

        match &report.outcome {
            BatchOutcome::Aborted {
                failed_file, error, ..
            } => {
                assert_eq!(failed_file, "a_b.wav");
                assert!(error.contains("already exists"), "{}", error);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(
            store.keys(),
            vec![
                "audio/processed_a_b.wav".to_string(),
                "spectrograms/processed_a_b.png".to_string(),
            ]
        );
        assert_eq!(report.files[0].status, FileStatus::Uploaded);
        assert_eq!(report.files[1].status, FileStatus::Failed);
        assert!(report.files[1].audio.is_none());
    }

    /// Store whose uploads never finish
    struct StalledStore {
        entered: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ObjectStore for StalledStore {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        fn bucket(&self) -> &str {
            "b"
        }

        async fn upload(
            &self,
            _key: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<UploadReceipt, StorageError> {
            self.entered.notify_one();
            std::future::pending().await
        }

        fn public_url(&self, key: &str) -> Result<reqwest::Url, StorageError> {
            Err(StorageError::MalformedUrl(key.to_string()))
        }
    }

    #[tokio::test]
    async fn test_dropped_run_returns_to_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StalledStore {
            entered: tokio::sync::Notify::new(),
        };
        let events = EventBus::new(64);
        let settings = settings_in(tmp.path());
        let mut driver = Driver::new(FailurePolicy::AbortBatch);
        let handle = driver.state_handle();

        driver.stage(vec![wav(0, "a.wav")]).unwrap();
        let mut run = Box::pin(driver.run(&store, &settings, &events));
        tokio::select! {
            _ = &mut run => panic!("batch finished with a stalled upload"),
            _ = store.entered.notified() => {}
        }
        assert!(matches!(
            read_state(&handle),
            DriverState::Processing { current: Some(ref name), .. } if name == "a.wav"
        ));

        // Cancel mid-upload
        drop(run);
        assert_eq!(read_state(&handle), DriverState::Idle);
        assert_eq!(driver.state(), DriverState::Idle);
    }
}
