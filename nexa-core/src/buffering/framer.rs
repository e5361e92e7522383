//! Fixed-length framing of a continuous sample stream.

use crate::error::{NexaError, Result};

/// Accumulates samples and yields frames of exactly `frame_len` samples,
/// in the order the samples arrived. Leftovers wait for the next push.
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    pending: Vec<f32>,
}

impl Framer {
    /// # Errors
    /// `NexaError::InvalidConfig` if `frame_len` is zero.
    pub fn new(frame_len: usize) -> Result<Self> {
        if frame_len == 0 {
            return Err(NexaError::InvalidConfig(
                "frame length must be non-zero".into(),
            ));
        }
        Ok(Self {
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
        })
    }

    /// Append `samples`, calling `emit` once per completed frame.
    pub fn push<F: FnMut(&[f32])>(&mut self, samples: &[f32], mut emit: F) {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len * self.frame_len;
        if complete == 0 {
            return;
        }
        for frame in self.pending[..complete].chunks_exact(self.frame_len) {
            emit(frame);
        }
        self.pending.drain(..complete);
    }

    /// Samples waiting for a frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
