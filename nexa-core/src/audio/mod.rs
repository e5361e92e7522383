//! Audio hardware seam.
//!
//! # Contexts and streams
//!
//! A live session holds two device contexts, mirroring the browser's pair of
//! `AudioContext`s: an **input context** (the microphone device, frames
//! resampled to 16 kHz downstream) and an **output context** (the speaker
//! device, ideally opened at the model's 24 kHz). The microphone *stream* is
//! acquired separately from its context because that is the step that fails
//! on permission denial or a missing device.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Every method of these traits is therefore called on the device host
//! thread, and the returned handles never leave it. The backend object itself
//! is `Send + Sync` so it can be handed to that thread.
//!
//! # Callback constraints
//!
//! The input callback only pushes into an SPSC ring producer; the output
//! callback only `try_lock`s the playback scheduler. Neither allocates per
//! buffer in the steady state nor blocks.

pub mod clock;
pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
pub mod input;
#[cfg(feature = "audio-cpal")]
pub mod output;

use std::sync::{atomic::AtomicBool, Arc};

use crate::{buffering::AudioProducer, error::Result, playback::PlaybackRenderer};

pub use clock::{FrameClock, ManualClock, OutputClock};

/// Factory for device contexts. Implemented by [`CpalBackend`] and by test fakes.
pub trait AudioBackend: Send + Sync + 'static {
    /// Acquire the capture-side device context.
    ///
    /// `preferred_rate` is a hint; the context reports the rate it really runs at.
    fn open_input(
        &self,
        preferred_rate: u32,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn InputContext>>;

    /// Acquire the playback-side device context.
    fn open_output(&self, preferred_rate: u32) -> Result<Box<dyn OutputContext>>;
}

/// Capture-side device context.
pub trait InputContext {
    /// Rate at which microphone samples will be pushed into the ring.
    fn sample_rate(&self) -> u32;

    /// Request the microphone stream. Mono f32 samples go to `producer`
    /// while `gate` is `true`; with the gate closed the callback no-ops.
    ///
    /// # Errors
    /// `NexaError::MicrophoneUnavailable` on denial or a missing device.
    fn request_microphone(
        &mut self,
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
    ) -> Result<Box<dyn MicrophoneStream>>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// A live microphone track.
pub trait MicrophoneStream {
    /// Stop the hardware track. Idempotent.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Playback-side device context.
pub trait OutputContext {
    fn sample_rate(&self) -> u32;

    /// The context's monotonic clock, shared with the playback scheduler.
    fn clock(&self) -> Arc<dyn OutputClock>;

    /// Start pulling audio from `renderer`.
    fn connect(&mut self, renderer: PlaybackRenderer) -> Result<()>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Production backend over the default cpal host.
#[cfg(feature = "audio-cpal")]
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

#[cfg(feature = "audio-cpal")]
impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        preferred_rate: u32,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn InputContext>> {
        Ok(Box::new(input::CpalInputContext::open(
            preferred_rate,
            preferred_device,
        )?))
    }

    fn open_output(&self, preferred_rate: u32) -> Result<Box<dyn OutputContext>> {
        Ok(Box::new(output::CpalOutputContext::open(preferred_rate)?))
    }
}
