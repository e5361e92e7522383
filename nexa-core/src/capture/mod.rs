//! Microphone → session uplink.
//!
//! ## Stages (per pump)
//!
//! ```text
//! 1. Drain the SPSC ring (native-rate mono f32)
//! 2. RateConverter → 16 kHz
//! 3. Framer → exact 4096-sample frames
//! 4. float_frame_to_transport_chunk
//! 5. UnboundedSender::send (never blocks, never awaits)
//! ```
//!
//! The pipeline lives on the device host thread and is the only producer on
//! the outbound channel, so frames reach the session in capture order. The
//! receiver is drained by a forwarder task once the session exists; frames
//! captured earlier simply wait in the channel.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::{
    audio::resample::RateConverter,
    buffering::{framer::Framer, AudioConsumer, Consumer},
    codec::{float_frame_to_transport_chunk, TransportChunk},
    error::Result,
};

/// Samples drained from the ring per iteration; 20 ms at 48 kHz.
const DRAIN_CHUNK: usize = 960;

/// Counters shared between the capture pipeline and the lifecycle manager.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub samples_in: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub samples_dropped: AtomicUsize,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    /// Native-rate samples drained from the microphone ring.
    pub samples_in: usize,
    /// Encoded frames handed to the outbound channel.
    pub frames_sent: usize,
    /// Capture-rate samples discarded because the outbound side was gone.
    pub samples_dropped: usize,
}

/// The capture processing node.
pub struct CapturePipeline {
    consumer: AudioConsumer,
    converter: RateConverter,
    framer: Framer,
    sink: UnboundedSender<TransportChunk>,
    diagnostics: Arc<CaptureDiagnostics>,
    raw: Vec<f32>,
    sink_closed: bool,
}

impl CapturePipeline {
    /// # Errors
    /// `NexaError::InvalidConfig` for a zero `frame_len`, or a device error if
    /// the resampler cannot be built for these rates.
    pub fn new(
        consumer: AudioConsumer,
        input_rate: u32,
        capture_rate: u32,
        frame_len: usize,
        sink: UnboundedSender<TransportChunk>,
        diagnostics: Arc<CaptureDiagnostics>,
    ) -> Result<Self> {
        let converter = RateConverter::new(input_rate, capture_rate, DRAIN_CHUNK)?;
        info!(
            input_rate,
            capture_rate,
            frame_len,
            passthrough = converter.is_passthrough(),
            "capture pipeline wired"
        );
        Ok(Self {
            consumer,
            converter,
            framer: Framer::new(frame_len)?,
            sink,
            diagnostics,
            raw: vec![0f32; DRAIN_CHUNK],
            sink_closed: false,
        })
    }

    /// Move everything currently in the ring through to the outbound channel.
    /// Returns the number of frames sent by this call.
    pub fn pump(&mut self) -> usize {
        let mut sent = 0;
        loop {
            let n = self.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                break;
            }
            self.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

            let resampled = self.converter.process(&self.raw[..n]);
            if resampled.is_empty() {
                continue;
            }

            let sink = &self.sink;
            let diagnostics = &self.diagnostics;
            let sink_closed = &mut self.sink_closed;
            self.framer.push(&resampled, |frame| {
                if sink.send(float_frame_to_transport_chunk(frame)).is_ok() {
                    diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
                    sent += 1;
                } else {
                    diagnostics
                        .samples_dropped
                        .fetch_add(frame.len(), Ordering::Relaxed);
                    if !*sink_closed {
                        debug!("outbound queue closed; dropping captured frames");
                        *sink_closed = true;
                    }
                }
            });
        }
        sent
    }
}
