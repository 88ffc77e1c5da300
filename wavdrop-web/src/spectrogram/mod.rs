//! Mel-spectrogram rendering
//!
//! Waveform → mel power spectrogram → dB (relative to peak) → PNG figure.

pub mod db;
pub mod mel;
pub mod render;

pub use db::{power_to_db, AMIN, TOP_DB};
pub use mel::{compute_mel, MelParams};
pub use render::{live_figures, render_png, Figure, FIGURE_HEIGHT, FIGURE_WIDTH};

use crate::audio::Waveform;
use crate::error::PipelineResult;

/// Render the full spectrogram figure for a waveform as PNG bytes
///
/// Blocking: run on the blocking pool from async code.
pub fn spectrogram_png(waveform: &Waveform, title: &str) -> PipelineResult<Vec<u8>> {
    let mel = compute_mel(&waveform.samples, waveform.sample_rate, &MelParams::default());
    let db = power_to_db(&mel, AMIN, TOP_DB);
    render_png(&db, title)
}
