//! 16-bit PCM WAV output

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::debug;

use super::Waveform;
use crate::error::PipelineResult;

/// Write `waveform` as a mono 16-bit signed PCM WAV file
///
/// Samples are clamped to [-1.0, 1.0] and scaled by `i16::MAX`. An existing
/// file at `path` is replaced.
pub fn write_wav(path: &Path, waveform: &Waveform) -> PipelineResult<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in &waveform.samples {
        writer.write_sample(to_pcm16(sample))?;
    }
    writer.finalize()?;

    debug!(
        path = %path.display(),
        samples = waveform.samples.len(),
        sample_rate = waveform.sample_rate,
        "WAV written"
    );
    Ok(())
}

fn to_pcm16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    (clamped * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{decode_bytes, AudioFormat};

    #[test]
    fn test_to_pcm16_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), i16::MAX);
        assert_eq!(to_pcm16(2.5), i16::MAX);
        assert_eq!(to_pcm16(-1.0), -i16::MAX);
        assert_eq!(to_pcm16(-7.0), -i16::MAX);
        assert_eq!(to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn test_write_then_decode_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round_trip.wav");

        let samples: Vec<f32> = (0..1600)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * 250.0 * i as f32 / 16_000.0).sin())
            .collect();
        let waveform = Waveform {
            samples: samples.clone(),
            sample_rate: 16_000,
        };

        write_wav(&path, &waveform).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, SampleFormat::Int);

        let decoded = decode_bytes(std::fs::read(&path).unwrap(), AudioFormat::Wav).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), samples.len());

        // Quantization step plus the 32767 vs 32768 scale mismatch
        let tolerance = 2.0 / 32_768.0;
        for (original, restored) in samples.iter().zip(&decoded.samples) {
            assert!(
                (original - restored).abs() <= tolerance,
                "{} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.wav");
        let waveform = Waveform {
            samples: vec![0.0; 16],
            sample_rate: 16_000,
        };
        assert!(write_wav(&path, &waveform).is_err());
    }
}
