//! Live-session capability seam.
//!
//! The lifecycle manager never talks to a network protocol directly. It asks
//! a [`LiveTransport`] to open a session and gets back a [`LiveSession`]
//! handle for outbound audio plus an ordered stream of [`SessionEvent`]s.
//! `Closed` and `Error` are terminal: nothing follows them.

#[cfg(feature = "gemini-live")]
pub mod gemini;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{codec::TransportChunk, error::Result};

/// Bound on undelivered inbound events per session.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE_NAME: &str = "Kore";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are NEXA AGI OS Voice Interface. Concise, professional, futuristic tone.";

/// Parameters for opening a live session. Response modality is always audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveConfig {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.into(),
            voice_name: DEFAULT_VOICE_NAME.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
        }
    }
}

/// Everything a live session can report, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The remote side accepted the session; outbound audio may flow.
    Open,
    /// One chunk of synthesized speech.
    Audio(TransportChunk),
    /// The user spoke over playback; queued audio is stale.
    Interrupted,
    TurnComplete,
    Closed { reason: Option<String> },
    Error { message: String },
}

/// An open session and its event stream.
pub struct LiveConnection {
    pub session: Arc<dyn LiveSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Opens live sessions.
#[async_trait]
pub trait LiveTransport: Send + Sync + 'static {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection>;
}

/// Handle to one open session.
pub trait LiveSession: Send + Sync {
    /// Queue one outbound audio chunk. Must not block.
    ///
    /// # Errors
    /// `NexaError::Session` once the session is closed.
    fn send_realtime_input(&self, chunk: TransportChunk) -> Result<()>;

    /// Ask the remote side to close. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
