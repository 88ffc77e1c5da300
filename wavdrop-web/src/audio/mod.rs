//! Audio ingestion
//!
//! Turns an uploaded byte buffer into a [`Waveform`]: decode with symphonia,
//! mix down to mono, resample to [`TARGET_SAMPLE_RATE`].

pub mod decoder;
pub mod resampler;
pub mod wav;

pub use decoder::{decode_bytes, DecodedAudio};
pub use resampler::resample_mono;
pub use wav::write_wav;

use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Every waveform handed to the downstream steps is sampled at 16 kHz
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Accepted upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
}

impl AudioFormat {
    /// Extensions accepted by the upload widgets
    pub const ACCEPTED_EXTENSIONS: [&'static str; 3] = ["wav", "mp3", "ogg"];

    /// Match an extension (without dot, case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => Some(AudioFormat::Wav),
            "mp3" => Some(AudioFormat::Mp3),
            "ogg" => Some(AudioFormat::Ogg),
            _ => None,
        }
    }

    /// Format declared by a file name's extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = crate::naming::split_extension(name);
        ext.strip_prefix('.').and_then(Self::from_extension)
    }

    /// Extension passed to symphonia as a format hint
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
        }
    }
}

/// Decoded mono audio at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Mono samples, nominal range [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an upload and bring it to 16 kHz mono
///
/// Blocking: run on the blocking pool from async code.
pub fn load_waveform(bytes: Vec<u8>, format: AudioFormat) -> PipelineResult<Waveform> {
    let decoded = decode_bytes(bytes, format)?;
    let source_frames = decoded.samples.len();
    let samples = resample_mono(decoded.samples, decoded.sample_rate, TARGET_SAMPLE_RATE)?;
    if samples.is_empty() {
        return Err(PipelineError::Decode(format!(
            "Audio too short: {} frames at {} Hz leave no samples at {} Hz",
            source_frames, decoded.sample_rate, TARGET_SAMPLE_RATE
        )));
    }

    let waveform = Waveform {
        samples,
        sample_rate: TARGET_SAMPLE_RATE,
    };

    debug!(
        source_rate = decoded.sample_rate,
        source_channels = decoded.channels,
        samples = waveform.samples.len(),
        duration_seconds = format!("{:.2}", waveform.duration_seconds()),
        "Waveform loaded"
    );

    Ok(waveform)
}
