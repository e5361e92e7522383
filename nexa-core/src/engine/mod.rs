//! `LiveVoiceClient` — lifecycle manager for one live voice session.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveVoiceClient::new()
//!     └─► start()   Idle → Initializing   device host opens input + output contexts
//!                                          microphone requested (gated)
//!                        → Connecting      transport.open(live config)
//!                                          forwarder + event loop spawned
//!         event Open     → Active          capture wired to the outbound queue
//!         event Closed   → Closing → Idle  full teardown
//!         event Error    → Errored → Idle  full teardown
//!     └─► stop()         → Closing → Idle  full teardown, safe from any state
//! ```
//!
//! ## Cancellation
//!
//! `stop()` bumps an epoch under the state lock. `start()` re-checks its epoch
//! after each suspension point (device host ready, microphone granted,
//! session open) and releases whatever it acquired if the epoch moved,
//! returning `NexaError::Cancelled`. Late-resolving work can therefore never
//! wire new state onto a client that has already been torn down.
//!
//! ## Threading
//!
//! Audio resources live on the device host thread (see [`host`]). Session
//! events are consumed by one Tokio task, strictly in order; outbound frames
//! are drained by another. `LiveVoiceClient` is `Send + Sync` and cheap to clone.

pub mod host;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioBackend,
    capture::{CaptureDiagnostics, CaptureSnapshot},
    codec::{TransportChunk, CAPTURE_SAMPLE_RATE, DEFAULT_PLAYBACK_RATE},
    error::{NexaError, Result},
    ipc::events::{ClientState, ClientStatusEvent},
    playback::{PlaybackDecoder, PlaybackSnapshot, SharedScheduler},
    session::{LiveConfig, LiveSession, LiveTransport, SessionEvent},
};

use host::{DeviceHost, HostSettings, TeardownReport};

/// Broadcast channel capacity: 64 status events buffered for slow consumers.
const BROADCAST_CAP: usize = 64;

pub const MSG_INITIALIZING: &str = "Initializing Audio...";
pub const MSG_CONNECTING: &str = "Connecting to Gemini Live...";
pub const MSG_ACTIVE: &str = "Live Connection Active";
pub const MSG_REMOTE_CLOSED: &str = "Connection Closed";
pub const MSG_DISCONNECTING: &str = "Disconnecting...";
pub const MSG_IDLE: &str = "Idle";

/// Configuration for `LiveVoiceClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Rate of outbound microphone frames (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Preferred output context rate (Hz). Default: 24000.
    pub playback_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096.
    pub frame_len: usize,
    /// Input device name; `None` selects the system default.
    pub preferred_input_device: Option<String>,
    pub live: LiveConfig,
    /// Upper bound on waiting for the device host to release hardware.
    pub teardown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: DEFAULT_PLAYBACK_RATE,
            frame_len: 4096,
            preferred_input_device: None,
            live: LiveConfig::default(),
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

/// The live voice client handle. Clones share one client.
#[derive(Clone)]
pub struct LiveVoiceClient {
    inner: Arc<ClientInner>,
}

struct Lifecycle {
    state: ClientState,
    epoch: u64,
    seq: u64,
    last: ClientStatusEvent,
}

#[derive(Default)]
struct Resources {
    host: Option<DeviceHost>,
    scheduler: Option<SharedScheduler>,
    session: Option<Arc<dyn LiveSession>>,
    event_task: Option<JoinHandle<()>>,
    forward_task: Option<JoinHandle<()>>,
}

impl Resources {
    fn holds_any(&self) -> bool {
        self.host.is_some()
            || self.scheduler.is_some()
            || self.session.is_some()
            || self.event_task.is_some()
            || self.forward_task.is_some()
    }
}

struct ClientInner {
    config: ClientConfig,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn LiveTransport>,
    lifecycle: Mutex<Lifecycle>,
    resources: Mutex<Resources>,
    /// Serialises teardowns so `stop()` never returns while another is mid-flight.
    teardown_lock: tokio::sync::Mutex<()>,
    status_tx: broadcast::Sender<ClientStatusEvent>,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl LiveVoiceClient {
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let initial = ClientStatusEvent {
            seq: 0,
            state: ClientState::Idle,
            message: MSG_IDLE.into(),
            error: None,
        };
        Self {
            inner: Arc::new(ClientInner {
                config,
                backend,
                transport,
                lifecycle: Mutex::new(Lifecycle {
                    state: ClientState::Idle,
                    epoch: 0,
                    seq: 0,
                    last: initial,
                }),
                resources: Mutex::new(Resources::default()),
                teardown_lock: tokio::sync::Mutex::new(()),
                status_tx,
                diagnostics: Arc::new(CaptureDiagnostics::default()),
            }),
        }
    }

    /// Client over the default cpal host.
    #[cfg(feature = "audio-cpal")]
    pub fn with_cpal(config: ClientConfig, transport: Arc<dyn LiveTransport>) -> Self {
        Self::new(config, Arc::new(crate::audio::CpalBackend), transport)
    }

    /// Acquire audio, open the live session and start streaming.
    ///
    /// Resolves once the session handle exists; `Active` follows on the
    /// session's `Open` event.
    ///
    /// # Errors
    /// - `NexaError::InvalidConfig` for a zero `frame_len`; nothing is acquired.
    /// - `NexaError::AlreadyActive` unless the client is `Idle`.
    /// - `NexaError::Cancelled` if `stop()` ran before `start()` finished.
    /// - Device, microphone or session errors; the client has already been
    ///   torn down back to `Idle` when these are returned.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.config.frame_len == 0 {
            return Err(NexaError::InvalidConfig(
                "frame_len must be non-zero".into(),
            ));
        }
        let epoch = {
            let mut lc = inner.lifecycle.lock();
            if lc.state != ClientState::Idle {
                return Err(NexaError::AlreadyActive);
            }
            let epoch = lc.epoch;
            inner.emit(&mut lc, ClientState::Initializing, MSG_INITIALIZING, None);
            epoch
        };
        inner.diagnostics.reset();

        // ── 1. Device contexts ─────────────────────────────────────────────
        let settings = HostSettings {
            preferred_input_device: inner.config.preferred_input_device.clone(),
            capture_sample_rate: inner.config.capture_sample_rate,
            playback_sample_rate: inner.config.playback_sample_rate,
            frame_len: inner.config.frame_len,
        };
        let (host, ready) = match DeviceHost::spawn(
            Arc::clone(&inner.backend),
            settings,
            Arc::clone(&inner.diagnostics),
        )
        .await
        {
            Ok(pair) => pair,
            Err(e) => return inner.fail_start(epoch, e).await,
        };
        info!(
            input_rate = ready.input_rate,
            output_rate = ready.output_rate,
            "audio ready"
        );

        if !inner.store_if_current(epoch, |res| {
            res.host = Some(host.clone());
            res.scheduler = Some(ready.scheduler);
        }) {
            host.shutdown().await;
            return Err(NexaError::Cancelled);
        }

        // ── 2. Microphone ──────────────────────────────────────────────────
        if let Err(e) = host.acquire_microphone().await {
            return inner.fail_start(epoch, e).await;
        }
        if !inner.advance(epoch, ClientState::Connecting, MSG_CONNECTING, None) {
            return Err(NexaError::Cancelled);
        }

        // ── 3. Session ─────────────────────────────────────────────────────
        let connection = match inner.transport.open(&inner.config.live).await {
            Ok(connection) => connection,
            Err(e) => return inner.fail_start(epoch, e).await,
        };

        let session = connection.session;
        let events = connection.events;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let stored = inner.store_if_current(epoch, |res| {
            res.session = Some(Arc::clone(&session));
            res.forward_task = Some(tokio::spawn(forward_outbound(
                outbound_rx,
                Arc::clone(&session),
            )));
            res.event_task = Some(tokio::spawn(run_events(
                Arc::clone(inner),
                epoch,
                events,
                outbound_tx,
            )));
        });
        if !stored {
            session.close();
            return Err(NexaError::Cancelled);
        }

        info!("live session opened");
        Ok(())
    }

    /// Tear everything down and return to `Idle`.
    ///
    /// Safe from any state and at any time, including while `start()` is
    /// still awaiting. A no-op when already idle with nothing held.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut lc = inner.lifecycle.lock();
            lc.epoch += 1;
            if lc.state == ClientState::Idle && !inner.resources.lock().holds_any() {
                return Ok(());
            }
            if lc.state.can_transition_to(ClientState::Closing) {
                inner.emit(&mut lc, ClientState::Closing, MSG_DISCONNECTING, None);
            }
        }

        inner.teardown(false).await;

        let mut lc = inner.lifecycle.lock();
        if lc.state != ClientState::Idle {
            inner.emit(&mut lc, ClientState::Idle, MSG_IDLE, None);
        }
        info!("live voice client stopped");
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.inner.lifecycle.lock().state
    }

    /// The most recent status event.
    pub fn status(&self) -> ClientStatusEvent {
        self.inner.lifecycle.lock().last.clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ClientStatusEvent> {
        self.inner.status_tx.subscribe()
    }

    /// Playback timeline view; `None` when no output context is held.
    pub fn playback_snapshot(&self) -> Option<PlaybackSnapshot> {
        let resources = self.inner.resources.lock();
        resources.scheduler.as_ref().map(|s| s.lock().snapshot())
    }

    pub fn capture_diagnostics(&self) -> CaptureSnapshot {
        self.inner.diagnostics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl ClientInner {
    /// Record and broadcast a status change. Caller holds the lifecycle lock.
    fn emit(
        &self,
        lc: &mut Lifecycle,
        state: ClientState,
        message: &str,
        error: Option<String>,
    ) {
        if !lc.state.can_transition_to(state) {
            warn!(from = ?lc.state, to = ?state, "unexpected lifecycle transition");
        }
        lc.state = state;
        lc.seq += 1;
        lc.last = ClientStatusEvent {
            seq: lc.seq,
            state,
            message: message.to_string(),
            error,
        };
        info!(?state, message, "client status");
        let _ = self.status_tx.send(lc.last.clone());
    }

    /// Transition only if `epoch` is still current and the edge is legal.
    fn advance(
        &self,
        epoch: u64,
        state: ClientState,
        message: &str,
        error: Option<String>,
    ) -> bool {
        let mut lc = self.lifecycle.lock();
        if lc.epoch != epoch || !lc.state.can_transition_to(state) {
            return false;
        }
        self.emit(&mut lc, state, message, error);
        true
    }

    /// Lock order is lifecycle, then resources.
    fn store_if_current(&self, epoch: u64, store: impl FnOnce(&mut Resources)) -> bool {
        let lc = self.lifecycle.lock();
        if lc.epoch != epoch {
            return false;
        }
        store(&mut self.resources.lock());
        true
    }

    /// Report a start failure, tear down, and hand the error back.
    async fn fail_start(&self, epoch: u64, error: NexaError) -> Result<()> {
        let message = format!("Start Failed: {error}");
        if !self.advance(epoch, ClientState::Errored, &message, Some(error.to_string())) {
            // stop() got there first and owns the teardown.
            return Err(NexaError::Cancelled);
        }
        warn!("{message}");
        self.teardown(false).await;
        self.advance(epoch, ClientState::Idle, MSG_IDLE, None);
        Err(error)
    }

    /// Release everything held, each step only if its resource exists.
    async fn teardown(&self, from_event_loop: bool) -> TeardownReport {
        let _guard = self.teardown_lock.lock().await;
        let taken = std::mem::take(&mut *self.resources.lock());

        if let Some(task) = taken.forward_task {
            task.abort();
        }

        let mut report = TeardownReport::default();
        if let Some(host) = taken.host {
            match tokio::time::timeout(self.config.teardown_timeout, host.shutdown()).await {
                Ok(r) => report = r,
                Err(_) => warn!(
                    timeout_ms = self.config.teardown_timeout.as_millis() as u64,
                    "device host did not release audio in time"
                ),
            }
        }

        if let Some(scheduler) = taken.scheduler {
            scheduler.lock().clear();
        }
        if let Some(session) = taken.session {
            session.close();
        }
        if let Some(task) = taken.event_task {
            if !from_event_loop {
                task.abort();
            }
        }

        info!(?report, "teardown complete");
        report
    }
}

/// Drain captured frames into the session in capture order.
async fn forward_outbound(
    mut outbound: mpsc::UnboundedReceiver<TransportChunk>,
    session: Arc<dyn LiveSession>,
) {
    while let Some(chunk) = outbound.recv().await {
        if let Err(e) = session.send_realtime_input(chunk) {
            debug!("outbound forwarding stopped: {e}");
            break;
        }
    }
}

/// Consume session events strictly in order until a terminal one arrives.
async fn run_events(
    inner: Arc<ClientInner>,
    epoch: u64,
    mut events: mpsc::Receiver<SessionEvent>,
    outbound: mpsc::UnboundedSender<TransportChunk>,
) {
    let mut decoder: Option<PlaybackDecoder> = None;
    let terminal = loop {
        let Some(event) = events.recv().await else {
            break SessionEvent::Closed { reason: None };
        };
        if inner.lifecycle.lock().epoch != epoch {
            return;
        }

        match event {
            SessionEvent::Open => {
                let host = inner.resources.lock().host.clone();
                if let Some(host) = host {
                    if let Err(e) = host.start_capture(outbound.clone()) {
                        warn!("could not wire capture: {e}");
                    }
                }
                inner.advance(epoch, ClientState::Active, MSG_ACTIVE, None);
            }
            SessionEvent::Audio(chunk) => {
                let Some(scheduler) = inner.resources.lock().scheduler.clone() else {
                    continue;
                };
                let decoder = decoder
                    .get_or_insert_with(|| PlaybackDecoder::new(scheduler.lock().sample_rate()));
                // Decode outside the lock; the output callback only ever try_locks.
                match decoder.prepare(&chunk) {
                    Ok(audio) => {
                        scheduler.lock().schedule(audio);
                    }
                    Err(e) => warn!("dropping undecodable audio chunk: {e}"),
                }
            }
            SessionEvent::Interrupted => {
                if let Some(decoder) = decoder.as_mut() {
                    decoder.reset();
                }
                let scheduler = inner.resources.lock().scheduler.clone();
                if let Some(scheduler) = scheduler {
                    scheduler.lock().interrupt();
                }
            }
            SessionEvent::TurnComplete => {
                debug!("model turn complete");
                let tail = decoder.as_mut().and_then(PlaybackDecoder::flush);
                let scheduler = inner.resources.lock().scheduler.clone();
                if let (Some(tail), Some(scheduler)) = (tail, scheduler) {
                    scheduler.lock().schedule(tail);
                }
            }
            terminal @ (SessionEvent::Closed { .. } | SessionEvent::Error { .. }) => {
                break terminal;
            }
        }
    };

    let moved = match &terminal {
        SessionEvent::Error { message } => {
            let status = format!("Live API Error: {message}");
            warn!("{status}");
            inner.advance(epoch, ClientState::Errored, &status, Some(message.clone()))
        }
        _ => {
            info!("live session closed by remote");
            inner.advance(epoch, ClientState::Closing, MSG_REMOTE_CLOSED, None)
        }
    };
    if !moved {
        return;
    }

    inner.teardown(true).await;
    inner.advance(epoch, ClientState::Idle, MSG_IDLE, None);
}
