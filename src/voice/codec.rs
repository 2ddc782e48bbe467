//! Conversion between transport text, raw PCM bytes and sample buffers
//!
//! Outbound frames are 16-bit little-endian mono PCM at 16kHz, base64 encoded.
//! Inbound fragments are base64 text decoding to 16-bit little-endian PCM.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sample rate of outbound capture frames
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound response audio
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Mime tag understood by the receiving session
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Scale between normalized floats and 16-bit PCM
const PCM_SCALE: f32 = 32768.0;

/// Encoded audio ready for the session's realtime input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    /// Declared format, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,

    /// Base64 encoded PCM bytes
    pub data: String,
}

/// Decoded PCM audio, interleaved and normalized to [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    /// Build a buffer from interleaved samples
    ///
    /// # Errors
    ///
    /// Returns error if the rate or channel count is zero, or the sample count
    /// is not a whole number of frames
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(Error::Decode(format!(
                "invalid buffer format: {sample_rate}Hz, {channels} channels"
            )));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(Error::Decode(format!(
                "{} samples is not a whole number of {channels}-channel frames",
                samples.len()
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Samples of a single channel
    #[must_use]
    pub fn channel(&self, index: u16) -> Vec<f32> {
        if index >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(usize::from(index))
            .step_by(usize::from(self.channels))
            .copied()
            .collect()
    }

    /// Average all channels down to mono
    #[must_use]
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let channels = f32::from(self.channels);
        self.samples
            .chunks_exact(usize::from(self.channels))
            .map(|frame| frame.iter().sum::<f32>() / channels)
            .collect()
    }
}

/// Decode base64 transport text into raw bytes
///
/// # Errors
///
/// Returns `Error::Decode` if the text is not valid base64
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {e}")))
}

/// Encode float samples as a 16-bit PCM blob for the session
///
/// Samples outside [-1.0, 1.0] are clamped rather than wrapped.
#[must_use]
pub fn encode_capture_frame(samples: &[f32]) -> MediaBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&float_to_pcm16(sample).to_le_bytes());
    }

    MediaBlob {
        mime_type: CAPTURE_MIME_TYPE.to_string(),
        data: STANDARD.encode(bytes),
    }
}

/// Interpret bytes as interleaved 16-bit PCM and build a playable buffer
///
/// # Errors
///
/// Returns `Error::Decode` if the byte length is not a multiple of
/// `2 * channel_count` or the format is invalid
pub fn decode_playback_frame(
    bytes: &[u8],
    sample_rate_hz: u32,
    channel_count: u16,
) -> Result<PcmBuffer> {
    if channel_count == 0 {
        return Err(Error::Decode("channel count must be non-zero".to_string()));
    }
    let frame_bytes = 2 * usize::from(channel_count);
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::Decode(format!(
            "{} bytes is not a multiple of {frame_bytes} bytes per frame",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM_SCALE)
        .collect();

    PcmBuffer::new(samples, sample_rate_hz, channel_count)
}

/// Convert a normalized float sample to 16-bit PCM with saturation
#[allow(clippy::cast_possible_truncation)]
fn float_to_pcm16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * PCM_SCALE).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(blob: &MediaBlob) -> Vec<u8> {
        decode_base64(&blob.data).unwrap()
    }

    #[test]
    fn test_encode_tags_mime_type() {
        let blob = encode_capture_frame(&[0.0; 4]);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert_eq!(pcm_bytes(&blob).len(), 8);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let blob = encode_capture_frame(&[0.5, -0.5]);
        let bytes = pcm_bytes(&blob);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 16384);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -16384);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let blob = encode_capture_frame(&[1.7, -3.0, 1.0, f32::NAN]);
        let bytes = pcm_bytes(&blob);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX, 0]);
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        let err = decode_base64("not base64 at all!").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_partial_frames() {
        assert!(matches!(
            decode_playback_frame(&[0, 0, 0], PLAYBACK_SAMPLE_RATE, 1),
            Err(Error::Decode(_))
        ));
        // Six bytes are three mono frames but one and a half stereo frames
        assert!(decode_playback_frame(&[0; 6], PLAYBACK_SAMPLE_RATE, 1).is_ok());
        assert!(matches!(
            decode_playback_frame(&[0; 6], PLAYBACK_SAMPLE_RATE, 2),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_zero_channels() {
        assert!(decode_playback_frame(&[0; 4], PLAYBACK_SAMPLE_RATE, 0).is_err());
    }

    #[test]
    fn test_decode_duration() {
        // 0.5s of 24kHz mono
        let bytes = vec![0u8; 24000];
        let buffer = decode_playback_frame(&bytes, PLAYBACK_SAMPLE_RATE, 1).unwrap();
        assert_eq!(buffer.frames(), 12000);
        assert!((buffer.duration() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_deinterleaves_channels() {
        let mut bytes = Vec::new();
        for v in [100i16, -100, 200, -200] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let buffer = decode_playback_frame(&bytes, PLAYBACK_SAMPLE_RATE, 2).unwrap();
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channel(0), vec![100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(buffer.channel(1), vec![-100.0 / 32768.0, -200.0 / 32768.0]);
        assert!(buffer.to_mono().iter().all(|s| s.abs() < f32::EPSILON));
    }

    #[test]
    fn test_round_trip_within_quantization() {
        let original: Vec<f32> = (0..256)
            .map(|i| ((i as f32) / 128.0 - 1.0) * 0.99)
            .collect();
        let blob = encode_capture_frame(&original);
        let buffer =
            decode_playback_frame(&pcm_bytes(&blob), CAPTURE_SAMPLE_RATE, 1).unwrap();

        assert_eq!(buffer.samples().len(), original.len());
        for (a, b) in original.iter().zip(buffer.samples()) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }
}
