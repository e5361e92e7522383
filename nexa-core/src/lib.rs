//! # nexa-core
//!
//! Real-time voice uplink SDK for the NEXA client.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputContext → SPSC RingBuffer → CapturePipeline (device host thread)
//!                                                    │  16 kHz, 4096-sample frames
//!                                           mpsc (capture order)
//!                                                    │
//!                                  forwarder ─► LiveSession::send_realtime_input
//!
//! LiveTransport events ─► event loop ─► PlaybackDecoder ─► PlaybackScheduler::schedule / interrupt
//!                                                    │
//!                            OutputContext callback ◄┘ PlaybackRenderer (try_lock)
//! ```
//!
//! The audio callbacks are allocation-free in the steady state. All lifecycle
//! decisions happen in `LiveVoiceClient`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;

// Convenience re-exports for downstream crates
pub use codec::{
    float_frame_to_transport_chunk, transport_chunk_to_float_frames, PcmFrames, TransportChunk,
};
pub use engine::{ClientConfig, LiveVoiceClient};
pub use error::{NexaError, Result};
pub use ipc::events::{ClientState, ClientStatusEvent};
pub use playback::{PlaybackDecoder, PlaybackScheduler, PlaybackSnapshot};
pub use session::{LiveConfig, LiveConnection, LiveSession, LiveTransport, SessionEvent};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;

#[cfg(feature = "gemini-live")]
pub use session::gemini::GeminiLiveTransport;
