//! Audio decoding
//!
//! Decodes an in-memory upload to mono f32 PCM with symphonia
//! (WAV, MP3, OGG/Vorbis and anything else the `all` feature enables).

use std::io::Cursor;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::debug;

use super::AudioFormat;
use crate::error::{PipelineError, PipelineResult};

/// Decoded audio at its native sample rate
#[derive(Debug)]
pub struct DecodedAudio {
    /// Mono audio samples (f32, range [-1.0, 1.0])
    pub samples: Vec<f32>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
    /// Channel count before the mono mixdown
    pub channels: usize,
}

/// Decode an upload buffer to mono f32 PCM
///
/// **Algorithm:**
/// 1. Detect the container using the declared extension as a hint
/// 2. Pick the first track with a real codec
/// 3. Decode all packets of that track
/// 4. Average all channels into one
///
/// # Errors
/// `PipelineError::Decode` for an unrecognized container, a missing audio
/// track, a corrupt packet, or a stream with no audio frames.
pub fn decode_bytes(bytes: Vec<u8>, format: AudioFormat) -> PipelineResult<DecodedAudio> {
    let byte_len = bytes.len();
    debug!(format = format.extension(), bytes = byte_len, "Decoding upload");

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PipelineError::Decode(format!("Unrecognized audio container: {}", e)))?;

    let mut reader = detected.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::Decode("No audio track found".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(PipelineError::Decode(format!("Error reading packet: {}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| PipelineError::Decode(format!("Failed to decode packet: {}", e)))?;

        // Some codecs only report their layout once the first packet is decoded
        let spec = *decoded.spec();
        if sample_rate.is_none() {
            sample_rate = Some(spec.rate);
        }
        if channels == 0 {
            channels = spec.channels.count();
        }

        all_samples.extend(mix_buffer_to_mono(&decoded));
    }

    let sample_rate = sample_rate
        .filter(|&rate| rate > 0)
        .ok_or_else(|| PipelineError::Decode("Sample rate unknown".to_string()))?;

    if all_samples.is_empty() {
        return Err(PipelineError::Decode(
            "Audio stream contains no frames".to_string(),
        ));
    }

    debug!(
        sample_rate,
        channels,
        frames = all_samples.len(),
        "Audio decoding complete"
    );

    Ok(DecodedAudio {
        samples: all_samples,
        sample_rate,
        channels,
    })
}

fn mix_buffer_to_mono(decoded: &AudioBufferRef) -> Vec<f32> {
    match decoded {
        AudioBufferRef::U8(buf) => mix_to_mono(&**buf),
        AudioBufferRef::U16(buf) => mix_to_mono(&**buf),
        AudioBufferRef::U24(buf) => mix_to_mono(&**buf),
        AudioBufferRef::U32(buf) => mix_to_mono(&**buf),
        AudioBufferRef::S8(buf) => mix_to_mono(&**buf),
        AudioBufferRef::S16(buf) => mix_to_mono(&**buf),
        AudioBufferRef::S24(buf) => mix_to_mono(&**buf),
        AudioBufferRef::S32(buf) => mix_to_mono(&**buf),
        AudioBufferRef::F32(buf) => mix_to_mono(&**buf),
        AudioBufferRef::F64(buf) => mix_to_mono(&**buf),
    }
}

/// Average every channel of a planar buffer into one f32 channel
fn mix_to_mono<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample,
    f32: FromSample<S>,
{
    let num_channels = buf.spec().channels.count();
    let num_frames = buf.frames();
    if num_channels == 0 {
        return Vec::new();
    }

    let mut mono = vec![0.0f32; num_frames];
    for ch in 0..num_channels {
        for (acc, &sample) in mono.iter_mut().zip(buf.chan(ch)) {
            *acc += f32::from_sample(sample);
        }
    }

    let scale = 1.0 / num_channels as f32;
    for sample in mono.iter_mut() {
        *sample *= scale;
    }
    mono
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sine_wav_bytes, WavFixture};

    #[test]
    fn test_decode_mono_wav_keeps_native_rate() {
        let bytes = sine_wav_bytes(&WavFixture {
            sample_rate: 22_050,
            channels: 1,
            seconds: 0.5,
            ..Default::default()
        });

        let decoded = decode_bytes(bytes, AudioFormat::Wav).unwrap();
        assert_eq!(decoded.sample_rate, 22_050);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), 11_025);
    }

    #[test]
    fn test_decode_stereo_wav_mixes_to_mono() {
        let bytes = sine_wav_bytes(&WavFixture {
            sample_rate: 44_100,
            channels: 2,
            seconds: 0.25,
            ..Default::default()
        });

        let decoded = decode_bytes(bytes, AudioFormat::Wav).unwrap();
        assert_eq!(decoded.channels, 2);
        // Frames, not interleaved samples
        assert_eq!(decoded.samples.len(), 11_025);

        let peak = decoded.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.25 && peak < 0.35, "peak was {}", peak);
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let result = decode_bytes(b"definitely not audio data".to_vec(), AudioFormat::Mp3);
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_decode_empty_buffer_is_decode_error() {
        let result = decode_bytes(Vec::new(), AudioFormat::Wav);
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_decode_truncated_header_is_decode_error() {
        let mut bytes = sine_wav_bytes(&WavFixture::default());
        bytes.truncate(20);
        let result = decode_bytes(bytes, AudioFormat::Wav);
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }
}
