//! Linear PCM conversion between float samples and transport text
//!
//! Outbound audio is 16-bit little-endian PCM, base64-encoded for the JSON wire.
//! Inbound audio uses the same sample format at the rate named in its media
//! descriptor (`audio/pcm;rate=24000`).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Scale between normalized float samples and signed 16-bit integers
const PCM16_SCALE: f32 = 32768.0;

/// Rate assumed for inbound audio when the media descriptor omits it
pub const DEFAULT_INBOUND_RATE: u32 = 24000;

/// Decoded inbound audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in `[-1.0, 1.0)`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Convert float samples to 16-bit little-endian PCM bytes
///
/// Each sample is scaled by 32768 and cast to `i16`. The cast saturates, so a
/// full-scale `1.0` lands on `i16::MAX` instead of wrapping.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn pcm16_bytes(frame: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        let value = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Encode a frame as base64 PCM16 for the outbound path
#[must_use]
pub fn encode_pcm16(frame: &[f32]) -> String {
    STANDARD.encode(pcm16_bytes(frame))
}

/// Reinterpret 16-bit little-endian PCM bytes as float samples
///
/// # Errors
///
/// Returns `Error::Decode` if the byte length is odd
pub fn samples_from_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM16_SCALE)
        .collect())
}

/// Decode a base64 PCM16 fragment received from the remote service
///
/// # Errors
///
/// Returns `Error::Decode` if the text is not valid base64 or the decoded
/// payload has an odd byte length
pub fn decode_pcm16(text: &str, sample_rate: u32) -> Result<DecodedAudio> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))?;

    Ok(DecodedAudio {
        samples: samples_from_pcm16(&bytes)?,
        sample_rate,
    })
}

/// Extract the sample rate from a media descriptor like `audio/pcm;rate=24000`
///
/// Falls back to [`DEFAULT_INBOUND_RATE`] when no usable `rate` parameter exists.
#[must_use]
pub fn media_rate(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|&rate| rate > 0)
        .unwrap_or(DEFAULT_INBOUND_RATE)
}

/// Media descriptor for outbound PCM16 audio at the given rate
#[must_use]
pub fn pcm_media_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}
