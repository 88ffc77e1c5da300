//! Event types for the wavdrop event system
//!
//! Provides the shared event enum and an `EventBus` (tokio broadcast channel)
//! used to stream batch progress to connected pages over SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of artifact produced for each uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Normalized 16 kHz mono WAV copy
    Audio,
    /// Mel-spectrogram PNG
    Spectrogram,
}

impl ArtifactKind {
    /// Bucket prefix the artifact is stored under
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Spectrogram => "spectrograms",
        }
    }

    /// Human-readable label used in status text
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "Audio",
            ArtifactKind::Spectrogram => "Spectrogram",
        }
    }

    /// MIME type sent with the upload
    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio/wav",
            ArtifactKind::Spectrogram => "image/png",
        }
    }
}

/// wavdrop event types
///
/// Events are broadcast via `EventBus` and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WavdropEvent {
    /// Trigger pressed with nothing staged
    NoFilesStaged {
        timestamp: DateTime<Utc>,
    },

    /// Batch entered Processing
    BatchStarted {
        batch_id: Uuid,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// One file entered the pipeline
    FileStarted {
        batch_id: Uuid,
        /// 0-based position within the batch
        index: usize,
        file_name: String,
        timestamp: DateTime<Utc>,
    },

    /// An artifact reached the bucket
    ArtifactUploaded {
        batch_id: Uuid,
        file_name: String,
        kind: ArtifactKind,
        key: String,
        public_url: String,
        timestamp: DateTime<Utc>,
    },

    /// One file failed
    FileFailed {
        batch_id: Uuid,
        file_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Every staged file was attempted
    BatchCompleted {
        batch_id: Uuid,
        files_processed: usize,
        files_failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Batch stopped at a failing file
    BatchAborted {
        batch_id: Uuid,
        failed_file: String,
        error: String,
        /// Staged files that were never attempted
        unattempted: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl WavdropEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            WavdropEvent::NoFilesStaged { .. } => "NoFilesStaged",
            WavdropEvent::BatchStarted { .. } => "BatchStarted",
            WavdropEvent::FileStarted { .. } => "FileStarted",
            WavdropEvent::ArtifactUploaded { .. } => "ArtifactUploaded",
            WavdropEvent::FileFailed { .. } => "FileFailed",
            WavdropEvent::BatchCompleted { .. } => "BatchCompleted",
            WavdropEvent::BatchAborted { .. } => "BatchAborted",
        }
    }

    /// Batch this event belongs to, if any
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            WavdropEvent::NoFilesStaged { .. } => None,
            WavdropEvent::BatchStarted { batch_id, .. }
            | WavdropEvent::FileStarted { batch_id, .. }
            | WavdropEvent::ArtifactUploaded { batch_id, .. }
            | WavdropEvent::FileFailed { batch_id, .. }
            | WavdropEvent::BatchCompleted { batch_id, .. }
            | WavdropEvent::BatchAborted { batch_id, .. } => Some(*batch_id),
        }
    }
}

/// Broadcast bus for `WavdropEvent`
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WavdropEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use wavdrop_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<WavdropEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: WavdropEvent,
    ) -> Result<usize, broadcast::error::SendError<WavdropEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Progress events are informational; a page that is not connected
    /// simply misses them.
    pub fn emit_lossy(&self, event: WavdropEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
