//! Mel power spectrogram
//!
//! Centered STFT (zero padded by `n_fft / 2` on both sides), periodic Hann
//! window, power spectrum, then a Slaney-normalized triangular filterbank on
//! the Slaney mel scale.

use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// STFT and filterbank parameters
#[derive(Debug, Clone, PartialEq)]
pub struct MelParams {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub fmin: f32,
    /// Upper band edge; `None` means Nyquist
    pub fmax: Option<f32>,
}

impl Default for MelParams {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
        }
    }
}

impl MelParams {
    /// Number of frames produced for `num_samples` input samples
    pub fn frame_count(&self, num_samples: usize) -> usize {
        1 + num_samples / self.hop_length
    }
}

/// Compute the mel power spectrogram, shape `(n_mels, frames)`
pub fn compute_mel(samples: &[f32], sample_rate: u32, params: &MelParams) -> Array2<f32> {
    let n_fft = params.n_fft;
    let hop = params.hop_length;
    let n_freqs = n_fft / 2 + 1;

    let window = hann_window(n_fft);

    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; pad];
    padded.extend_from_slice(samples);
    padded.resize(padded.len() + pad, 0.0);

    let num_frames = params.frame_count(samples.len());
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut power = Array2::<f32>::zeros((n_freqs, num_frames));
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

    for frame in 0..num_frames {
        let start = frame * hop;
        for ((slot, &s), &w) in buffer
            .iter_mut()
            .zip(&padded[start..start + n_fft])
            .zip(&window)
        {
            *slot = Complex::new(s * w, 0.0);
        }

        fft.process(&mut buffer);

        for (bin, c) in buffer.iter().take(n_freqs).enumerate() {
            power[[bin, frame]] = c.norm_sqr();
        }
    }

    let fmax = params.fmax.unwrap_or(sample_rate as f32 / 2.0);
    let filterbank = mel_filterbank(sample_rate, n_fft, params.n_mels, params.fmin, fmax);
    filterbank.dot(&power)
}

/// Periodic Hann window of length `n`
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Hz to mel on the Slaney scale (linear below 1 kHz, logarithmic above)
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Inverse of [`hz_to_mel`]
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filterbank, shape `(n_mels, n_fft / 2 + 1)`
///
/// Each triangle is scaled by `2 / (f_right - f_left)` so every filter has
/// roughly constant energy per band.
pub fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Array2<f32> {
    let n_freqs = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| nyquist * k as f64 / (n_freqs - 1).max(1) as f64)
        .collect();

    let mel_min = hz_to_mel(fmin as f64);
    let mel_max = hz_to_mel(fmax as f64);
    let band_edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_freqs));
    for m in 0..n_mels {
        let (left, center, right) = (band_edges[m], band_edges[m + 1], band_edges[m + 2]);
        let enorm = 2.0 / (right - left);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - left) / (center - left);
            let upper = (right - f) / (right - center);
            let w = lower.min(upper).max(0.0);
            weights[[m, k]] = (w * enorm) as f32;
        }
    }
    weights
}
