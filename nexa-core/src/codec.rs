//! PCM codec utility.
//!
//! Converts between normalised `f32` samples and 16-bit little-endian PCM, and
//! between raw PCM bytes and the base64 text form the live session carries.
//!
//! ```text
//! outbound: [f32; 4096] ─► ×32768 ─► i16 LE bytes ─► base64 ─► TransportChunk("audio/pcm;rate=16000")
//! inbound:  TransportChunk ─► base64⁻¹ ─► i16 LE ─► de-interleave ─► ÷32768 ─► PcmFrames
//! ```
//!
//! Float → i16 uses Rust's saturating `as` cast: out-of-range input clamps to
//! `i16::MIN..=i16::MAX` and NaN becomes 0. No input is rejected on the way out.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::buffering::chunk::{AudioChunk, PcmCodec};
use crate::error::{NexaError, Result};

/// Rate of every outbound (microphone) chunk.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate the live model speaks at when the mime type carries no `rate=`.
pub const DEFAULT_PLAYBACK_RATE: u32 = 24_000;

/// Mime tag attached to every outbound chunk.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

const PCM_SCALE: f32 = 32768.0;

/// Text-safe form of one PCM buffer, as sent to / received from the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportChunk {
    pub mime_type: String,
    /// Base64 (standard alphabet, padded) of little-endian i16 samples.
    pub data: String,
}

impl TransportChunk {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Sample rate from the `rate=` mime parameter, if present and numeric.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }

    /// `true` for raw PCM payloads (`audio/pcm`, any parameters).
    pub fn is_pcm(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .map(|base| base.trim().eq_ignore_ascii_case("audio/pcm"))
            .unwrap_or(false)
    }
}

/// Decoded audio: one sample vector per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrames {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PcmFrames {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

/// Encode raw bytes into the transport text form.
pub fn encode_transport(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode transport text back into raw bytes.
///
/// # Errors
/// `NexaError::Decode` if the text is not valid padded standard base64.
pub fn decode_transport(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| NexaError::Decode(format!("invalid transport encoding: {e}")))
}

/// Scale `[-1, 1]` floats to i16 and pack them little-endian.
pub fn float_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM_SCALE) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Reinterpret little-endian bytes as i16 samples.
///
/// # Errors
/// `NexaError::Decode` on an odd byte count.
pub fn pcm16_le_to_i16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(NexaError::Decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode one captured mono frame for the live session.
pub fn float_frame_to_transport_chunk(samples: &[f32]) -> TransportChunk {
    AudioChunk::new(float_to_pcm16_le(samples), CAPTURE_SAMPLE_RATE, 1).to_transport()
}

/// Decode a transport chunk into per-channel float samples.
///
/// # Errors
/// `NexaError::Decode` on bad base64, an odd byte count, or zero channels.
pub fn transport_chunk_to_float_frames(
    chunk: &TransportChunk,
    sample_rate: u32,
    channels: u16,
) -> Result<PcmFrames> {
    let audio = AudioChunk::from_transport(chunk, sample_rate, channels)?;
    audio_chunk_to_float_frames(&audio)
}

/// De-interleave and rescale a PCM chunk.
pub fn audio_chunk_to_float_frames(chunk: &AudioChunk) -> Result<PcmFrames> {
    if chunk.channels() == 0 {
        return Err(NexaError::Decode("channel count must be non-zero".into()));
    }
    if chunk.sample_rate() == 0 {
        return Err(NexaError::Decode("sample rate must be non-zero".into()));
    }
    match chunk.codec() {
        PcmCodec::S16Le => {}
    }

    let samples = pcm16_le_to_i16(chunk.bytes())?;
    let ch = chunk.channels() as usize;
    let frames = samples.len() / ch;

    let mut channels = vec![Vec::with_capacity(frames); ch];
    for frame in samples.chunks_exact(ch) {
        for (c, sample) in frame.iter().enumerate() {
            channels[c].push(*sample as f32 / PCM_SCALE);
        }
    }

    Ok(PcmFrames {
        channels,
        sample_rate: chunk.sample_rate(),
    })
}

/// Exact frame count → duration conversion (nanosecond resolution).
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Duration → nearest frame index at `sample_rate`.
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let scaled = duration.as_nanos() * sample_rate as u128 + 500_000_000;
    (scaled / 1_000_000_000) as u64
}
