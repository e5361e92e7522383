//! Sample-rate conversion using rubato's `FastFixedIn` resampler.
//!
//! [`RateConverter`] is streaming. The capture pipeline feeds it whatever the
//! microphone ring yields; the playback decoder feeds it the model's chunks
//! one after another. Output is emitted as full rubato blocks become
//! available and remainders carry over between calls, so the filter state
//! runs continuously across chunk boundaries.
//!
//! When source rate == target rate it is passthrough and no rubato
//! session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{NexaError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `source_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate the consumer expects (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `NexaError::AudioDevice` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let resampler = new_fast_fixed_in(source_rate, target_rate, chunk_size, 1)?;
        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(
            source_rate,
            target_rate,
            chunk_size,
            max_out,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Push out the held remainder, zero-padded to a full block, then reset.
    ///
    /// Used at the end of a stream; the padding comes back as trailing
    /// near-silence.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return std::mem::take(&mut self.input_buf);
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        let remainder: &[&[f32]] = &[&self.input_buf[..]];
        let mut result = Vec::new();
        match resampler.process_partial_into_buffer(Some(remainder), &mut self.output_buf, None) {
            Ok((_consumed, produced)) => {
                result.extend_from_slice(&self.output_buf[0][..produced]);
            }
            Err(e) => error!("resampler flush error: {e}"),
        }
        self.reset();
        result
    }

    /// Drop any buffered remainder and the filter history.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

fn new_fast_fixed_in(
    source_rate: u32,
    target_rate: u32,
    chunk_size: usize,
    channels: usize,
) -> Result<FastFixedIn<f32>> {
    let ratio = target_rate as f64 / source_rate as f64;
    FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio — no dynamic adjustment
        PolynomialDegree::Cubic,
        chunk_size,
        channels,
    )
    .map_err(|e| NexaError::AudioDevice(format!("resampler init: {e}")))
}
