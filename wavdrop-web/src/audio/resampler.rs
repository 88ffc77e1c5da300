//! Sample-rate conversion
//!
//! High-quality resampling with rubato `SincFixedIn`, processed as a single
//! chunk: uploads are short clips, so the whole waveform fits one pass. The
//! filter delay is flushed and trimmed so output sample 0 lines up with input
//! sample 0.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Resample mono PCM from `source_rate` to `target_rate`
///
/// Returns the input unchanged when the rates already match or the input is
/// empty.
///
/// # Algorithm
/// - Sinc interpolation with BlackmanHarris2 window
/// - 256-tap filter, 0.95 cutoff to prevent aliasing
/// - Chunk size equal to the input length (single pass)
/// - Output length is `round(len * target / source)`
pub fn resample_mono(
    samples: Vec<f32>,
    source_rate: u32,
    target_rate: u32,
) -> PipelineResult<Vec<f32>> {
    if source_rate == 0 || target_rate == 0 {
        return Err(PipelineError::Resample(format!(
            "Invalid sample rates: {} Hz -> {} Hz",
            source_rate, target_rate
        )));
    }
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples);
    }

    let num_frames = samples.len();
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let resample_ratio = target_rate as f64 / source_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(
        resample_ratio,
        1.0, // fixed ratio, no runtime adjustment
        params,
        num_frames,
        1,
    )
    .map_err(|e| PipelineError::Resample(format!("Failed to create resampler: {}", e)))?;

    let expected_frames = (num_frames as f64 * resample_ratio).round() as usize;
    let delay = resampler.output_delay();

    let input_channels = vec![samples];
    let mut output = resampler
        .process(&input_channels, None)
        .map_err(|e| PipelineError::Resample(format!("Resampling failed: {}", e)))?
        .pop()
        .unwrap_or_default();

    // Flush until the delayed tail is out; short clips need several passes
    let needed = delay + expected_frames;
    let frames_per_pass = num_frames as f64 * resample_ratio;
    let max_passes = (needed as f64 / frames_per_pass).ceil() as usize + 2;
    for _ in 0..max_passes {
        if output.len() >= needed {
            break;
        }
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| PipelineError::Resample(format!("Resampler flush failed: {}", e)))?
            .pop()
            .unwrap_or_default();
        output.extend(tail);
    }

    let output: Vec<f32> = output
        .into_iter()
        .skip(delay)
        .take(expected_frames)
        .collect();
    if output.len() != expected_frames {
        return Err(PipelineError::Resample(format!(
            "Resampler produced {} of {} frames",
            output.len(),
            expected_frames
        )));
    }

    debug!(
        "Resampled {} frames ({} Hz) -> {} frames ({} Hz)",
        num_frames,
        source_rate,
        output.len(),
        target_rate
    );

    Ok(output)
}
