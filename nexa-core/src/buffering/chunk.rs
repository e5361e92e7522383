//! Typed PCM chunk exchanged with the live session.

use std::time::Duration;

use crate::codec::{decode_transport, encode_transport, frames_to_duration, TransportChunk};
use crate::error::{NexaError, Result};

/// Sample encoding carried by an [`AudioChunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmCodec {
    /// Raw signed 16-bit little-endian PCM, interleaved by channel.
    S16Le,
}

/// One immutable frame of raw PCM at a known rate and channel count.
///
/// Produced by the capture pipeline (outbound) or decoded from a
/// [`TransportChunk`] (inbound). Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    bytes: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    codec: PcmCodec,
}

impl AudioChunk {
    pub fn new(bytes: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            bytes,
            sample_rate,
            channels,
            codec: PcmCodec::S16Le,
        }
    }

    /// Decode the transport text of `chunk`. The mime `rate=` parameter wins
    /// over `fallback_rate` when present.
    pub fn from_transport(chunk: &TransportChunk, fallback_rate: u32, channels: u16) -> Result<Self> {
        if !chunk.is_pcm() {
            return Err(NexaError::Decode(format!(
                "unsupported mime type: {}",
                chunk.mime_type
            )));
        }
        let bytes = decode_transport(&chunk.data)?;
        let sample_rate = chunk.sample_rate().unwrap_or(fallback_rate);
        Ok(Self::new(bytes, sample_rate, channels))
    }

    pub fn to_transport(&self) -> TransportChunk {
        TransportChunk::new(self.mime_type(), encode_transport(&self.bytes))
    }

    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn codec(&self) -> PcmCodec {
        self.codec
    }

    /// Whole sample frames in this chunk.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.bytes.len() / (2 * self.channels as usize)
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames() as u64, self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_rate_and_channels() {
        let mono = AudioChunk::new(vec![0; 4_800], 24_000, 1);
        assert_eq!(mono.frames(), 2_400);
        assert_eq!(mono.duration(), Duration::from_millis(100));

        let stereo = AudioChunk::new(vec![0; 4_800], 24_000, 2);
        assert_eq!(stereo.duration(), Duration::from_millis(50));
    }

    #[test]
    fn transport_rate_overrides_fallback() {
        let chunk = TransportChunk::new("audio/pcm;rate=16000", encode_transport(&[0; 64]));
        let audio = AudioChunk::from_transport(&chunk, 24_000, 1).unwrap();
        assert_eq!(audio.sample_rate(), 16_000);
        assert_eq!(audio.to_transport(), chunk);
    }

    #[test]
    fn non_pcm_mime_is_rejected() {
        let chunk = TransportChunk::new("audio/mpeg", encode_transport(&[0; 4]));
        assert!(AudioChunk::from_transport(&chunk, 24_000, 1).is_err());
    }
}
