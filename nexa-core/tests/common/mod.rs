#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nexa_core::audio::{
    AudioBackend, InputContext, ManualClock, MicrophoneStream, OutputClock, OutputContext,
};
use nexa_core::buffering::{AudioProducer, Producer};
use nexa_core::codec::{encode_transport, float_to_pcm16_le};
use nexa_core::ipc::events::{ClientState, ClientStatusEvent};
use nexa_core::playback::PlaybackRenderer;
use nexa_core::{
    LiveConfig, LiveConnection, LiveSession, LiveTransport, NexaError, SessionEvent,
    TransportChunk,
};
use parking_lot::{Condvar, Mutex};
use tokio::sync::{broadcast, mpsc, Notify};

/// Counts of live hardware resources. Every field returns to zero after teardown.
#[derive(Debug, Default)]
pub struct Ledger {
    pub inputs_open: AtomicIsize,
    pub outputs_open: AtomicIsize,
    pub microphones_active: AtomicIsize,
    pub microphone_requests: AtomicUsize,
}

impl Ledger {
    pub fn all_released(&self) -> bool {
        self.inputs_open.load(Ordering::SeqCst) == 0
            && self.outputs_open.load(Ordering::SeqCst) == 0
            && self.microphones_active.load(Ordering::SeqCst) == 0
    }
}

type Feeder = Arc<Mutex<Option<(AudioProducer, Arc<AtomicBool>)>>>;

/// Backend call that a held backend parks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPoint {
    OpenInput,
    Microphone,
}

/// Parks the device host thread inside a backend call until released.
#[derive(Default)]
pub struct AcquireHold {
    entered: AtomicBool,
    released: Mutex<bool>,
    wake: Condvar,
}

impl AcquireHold {
    fn block(&self) {
        self.entered.store(true, Ordering::SeqCst);
        let mut released = self.released.lock();
        while !*released {
            self.wake.wait(&mut released);
        }
    }

    /// `true` once the host thread is parked (or has passed through).
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        *self.released.lock() = true;
        self.wake.notify_all();
    }
}

pub struct FakeBackend {
    pub ledger: Arc<Ledger>,
    pub clock: Arc<ManualClock>,
    pub fail_microphone: bool,
    pub input_rate: u32,
    pub output_rate: u32,
    feeder: Feeder,
    hold: Option<(HoldPoint, Arc<AcquireHold>)>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Ledger::default()),
            clock: Arc::new(ManualClock::new()),
            fail_microphone: false,
            input_rate: 16_000,
            output_rate: 24_000,
            feeder: Arc::new(Mutex::new(None)),
            hold: None,
        }
    }

    /// A backend whose `point` call blocks until the returned hold is released.
    pub fn held_at(point: HoldPoint) -> (Self, Arc<AcquireHold>) {
        let hold = Arc::new(AcquireHold::default());
        let backend = Self {
            hold: Some((point, Arc::clone(&hold))),
            ..Self::new()
        };
        (backend, hold)
    }

    fn hold_for(&self, point: HoldPoint) -> Option<Arc<AcquireHold>> {
        self.hold
            .as_ref()
            .filter(|(at, _)| *at == point)
            .map(|(_, hold)| Arc::clone(hold))
    }

    pub fn denying_microphone() -> Self {
        Self {
            fail_microphone: true,
            ..Self::new()
        }
    }

    /// `true` once the capture node is connected.
    pub fn gate_open(&self) -> bool {
        self.feeder
            .lock()
            .as_ref()
            .map(|(_, gate)| gate.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Play the microphone callback: samples enter the ring only while gated open.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let mut feeder = self.feeder.lock();
        match feeder.as_mut() {
            Some((producer, gate)) if gate.load(Ordering::Acquire) => {
                producer.push_slice(samples) == samples.len()
            }
            _ => false,
        }
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(
        &self,
        _preferred_rate: u32,
        _preferred_device: Option<&str>,
    ) -> nexa_core::Result<Box<dyn InputContext>> {
        if let Some(hold) = self.hold_for(HoldPoint::OpenInput) {
            hold.block();
        }
        self.ledger.inputs_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            ledger: Arc::clone(&self.ledger),
            feeder: Arc::clone(&self.feeder),
            hold: self.hold_for(HoldPoint::Microphone),
            fail_microphone: self.fail_microphone,
            rate: self.input_rate,
            closed: false,
        }))
    }

    fn open_output(&self, _preferred_rate: u32) -> nexa_core::Result<Box<dyn OutputContext>> {
        self.ledger.outputs_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutput {
            ledger: Arc::clone(&self.ledger),
            clock: Arc::clone(&self.clock),
            rate: self.output_rate,
            renderer: None,
            closed: false,
        }))
    }
}

struct FakeInput {
    ledger: Arc<Ledger>,
    feeder: Feeder,
    hold: Option<Arc<AcquireHold>>,
    fail_microphone: bool,
    rate: u32,
    closed: bool,
}

impl InputContext for FakeInput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn request_microphone(
        &mut self,
        producer: AudioProducer,
        gate: Arc<AtomicBool>,
    ) -> nexa_core::Result<Box<dyn MicrophoneStream>> {
        self.ledger.microphone_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.block();
        }
        if self.fail_microphone {
            return Err(NexaError::MicrophoneUnavailable("permission denied".into()));
        }
        *self.feeder.lock() = Some((producer, gate));
        self.ledger.microphones_active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMicrophone {
            ledger: Arc::clone(&self.ledger),
            feeder: Arc::clone(&self.feeder),
            active: true,
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.ledger.inputs_open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct FakeMicrophone {
    ledger: Arc<Ledger>,
    feeder: Feeder,
    active: bool,
}

impl MicrophoneStream for FakeMicrophone {
    fn stop(&mut self) {
        if self.active {
            self.active = false;
            *self.feeder.lock() = None;
            self.ledger.microphones_active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

struct FakeOutput {
    ledger: Arc<Ledger>,
    clock: Arc<ManualClock>,
    rate: u32,
    renderer: Option<PlaybackRenderer>,
    closed: bool,
}

impl OutputContext for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    fn connect(&mut self, renderer: PlaybackRenderer) -> nexa_core::Result<()> {
        self.renderer = Some(renderer);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.renderer = None;
            self.ledger.outputs_open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Transport whose events are pushed by the test.
#[derive(Default)]
pub struct FakeTransport {
    pub opens: AtomicUsize,
    pub sent: Arc<Mutex<Vec<TransportChunk>>>,
    pub closed: Arc<AtomicBool>,
    events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    /// When set, `open` waits for `release_open` before resolving.
    hold: Option<Arc<Notify>>,
    fail_open: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held() -> Self {
        Self {
            hold: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn release_open(&self) {
        if let Some(hold) = &self.hold {
            hold.notify_one();
        }
    }

    pub async fn push(&self, event: SessionEvent) {
        let tx = self.events.lock().clone().expect("no session opened");
        tx.send(event).await.expect("event loop gone");
    }

    pub fn sent_chunks(&self) -> Vec<TransportChunk> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl LiveTransport for FakeTransport {
    async fn open(&self, _config: &LiveConfig) -> nexa_core::Result<LiveConnection> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if self.fail_open {
            return Err(NexaError::Session("handshake rejected".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.events.lock() = Some(tx);
        self.closed.store(false, Ordering::SeqCst);
        Ok(LiveConnection {
            session: Arc::new(FakeSession {
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }),
            events: rx,
        })
    }
}

struct FakeSession {
    sent: Arc<Mutex<Vec<TransportChunk>>>,
    closed: Arc<AtomicBool>,
}

impl LiveSession for FakeSession {
    fn send_realtime_input(&self, chunk: TransportChunk) -> nexa_core::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NexaError::Session("closed".into()));
        }
        self.sent.lock().push(chunk);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A 24 kHz mono chunk of `ms` milliseconds.
pub fn model_chunk_ms(ms: u64) -> TransportChunk {
    let samples = vec![0.1f32; (24 * ms) as usize];
    TransportChunk::new(
        "audio/pcm;rate=24000",
        encode_transport(&float_to_pcm16_le(&samples)),
    )
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F, timeout: Duration) {
    let start = Instant::now();
    while !check() {
        if start.elapsed() >= timeout {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Collect status events until one with `state` arrives.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<ClientStatusEvent>,
    state: ClientState,
) -> Vec<ClientStatusEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed");
        let done = event.state == state;
        seen.push(event);
        if done {
            return seen;
        }
    }
}
