//! Device host: the one blocking thread that owns every audio resource.
//!
//! ## Per-iteration work
//!
//! ```text
//! 1. recv_timeout(PUMP_INTERVAL) on the command channel
//!      AcquireMicrophone → ring + gate (closed) + microphone stream
//!      StartCapture      → CapturePipeline wired to the outbound queue, gate opened
//!      Shutdown          → ordered teardown, reply with TeardownReport, exit
//! 2. CapturePipeline::pump()
//! ```
//!
//! Contexts are opened before `DeviceReady` is sent, so `spawn` resolving
//! means both device contexts exist and playback is connected. Every resource
//! is dropped on this thread, including on the error paths.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioBackend, InputContext, MicrophoneStream, OutputContext},
    buffering::{create_audio_ring, AudioConsumer},
    capture::{CaptureDiagnostics, CapturePipeline},
    codec::TransportChunk,
    error::{NexaError, Result},
    playback::{PlaybackRenderer, PlaybackScheduler, SharedScheduler},
};

/// Idle wait between capture pumps (avoids busy-wait burning a core).
const PUMP_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub(crate) struct HostSettings {
    pub preferred_input_device: Option<String>,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_len: usize,
}

/// What the host hands back once both contexts are open.
pub(crate) struct DeviceReady {
    pub scheduler: SharedScheduler,
    pub input_rate: u32,
    pub output_rate: u32,
}

/// Which teardown steps found something to release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub capture_detached: bool,
    pub microphone_stopped: bool,
    pub input_closed: bool,
    pub output_closed: bool,
}

enum HostCommand {
    AcquireMicrophone { reply: oneshot::Sender<Result<()>> },
    StartCapture { sink: UnboundedSender<TransportChunk> },
    Shutdown { reply: oneshot::Sender<TeardownReport> },
}

/// Cheap, cloneable handle to the device host thread.
#[derive(Clone)]
pub(crate) struct DeviceHost {
    commands: Sender<HostCommand>,
}

impl DeviceHost {
    /// Spawn the host thread and wait for both device contexts.
    ///
    /// On error the thread has already released whatever it opened.
    pub async fn spawn(
        backend: Arc<dyn AudioBackend>,
        settings: HostSettings,
        diagnostics: Arc<CaptureDiagnostics>,
    ) -> Result<(Self, DeviceReady)> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            run(backend, settings, diagnostics, command_rx, ready_tx);
        });

        match ready_rx.await {
            Ok(Ok(ready)) => Ok((Self { commands }, ready)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NexaError::AudioDevice(
                "device host exited before reporting".into(),
            )),
        }
    }

    /// Request the microphone stream. Capture stays gated until `start_capture`.
    pub async fn acquire_microphone(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::AcquireMicrophone { reply })?;
        rx.await
            .map_err(|_| NexaError::AudioDevice("device host stopped".into()))?
    }

    /// Connect the capture processing node to the outbound queue.
    pub fn start_capture(&self, sink: UnboundedSender<TransportChunk>) -> Result<()> {
        self.send(HostCommand::StartCapture { sink })
    }

    /// Tear down every audio resource and stop the thread.
    ///
    /// Safe to call more than once; later calls report nothing released.
    pub async fn shutdown(&self) -> TeardownReport {
        let (reply, rx) = oneshot::channel();
        if self.send(HostCommand::Shutdown { reply }).is_err() {
            return TeardownReport::default();
        }
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| NexaError::AudioDevice("device host stopped".into()))
    }
}

/// Resources owned by the host thread. Every field is independently optional.
struct HostResources {
    input: Option<Box<dyn InputContext>>,
    output: Option<Box<dyn OutputContext>>,
    microphone: Option<Box<dyn MicrophoneStream>>,
    consumer: Option<AudioConsumer>,
    pipeline: Option<CapturePipeline>,
    gate: Arc<AtomicBool>,
}

impl HostResources {
    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        // Disconnect the processing node first so nothing new enters the queue.
        self.gate.store(false, Ordering::Release);
        report.capture_detached = self.pipeline.take().is_some();
        self.consumer = None;

        if let Some(mut mic) = self.microphone.take() {
            mic.stop();
            report.microphone_stopped = true;
        }
        if let Some(mut input) = self.input.take() {
            input.close();
            report.input_closed = true;
        }
        if let Some(mut output) = self.output.take() {
            output.close();
            report.output_closed = true;
        }
        report
    }
}

fn run(
    backend: Arc<dyn AudioBackend>,
    settings: HostSettings,
    diagnostics: Arc<CaptureDiagnostics>,
    commands: Receiver<HostCommand>,
    ready: oneshot::Sender<Result<DeviceReady>>,
) {
    info!("device host started");

    let mut res = HostResources {
        input: None,
        output: None,
        microphone: None,
        consumer: None,
        pipeline: None,
        gate: Arc::new(AtomicBool::new(false)),
    };

    match open_contexts(&*backend, &settings, &mut res) {
        Ok(device_ready) => {
            if ready.send(Ok(device_ready)).is_err() {
                // start() went away while we were opening.
                res.teardown();
                return;
            }
        }
        Err(e) => {
            error!("device context acquisition failed: {e}");
            res.teardown();
            let _ = ready.send(Err(e));
            return;
        }
    }

    loop {
        match commands.recv_timeout(PUMP_INTERVAL) {
            Ok(HostCommand::AcquireMicrophone { reply }) => {
                let _ = reply.send(acquire_microphone(&mut res));
            }
            Ok(HostCommand::StartCapture { sink }) => {
                start_capture(&mut res, &settings, &diagnostics, sink);
            }
            Ok(HostCommand::Shutdown { reply }) => {
                let report = res.teardown();
                info!(?report, "device host stopped");
                let _ = reply.send(report);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("device host orphaned; releasing audio resources");
                res.teardown();
                return;
            }
        }

        if let Some(pipeline) = res.pipeline.as_mut() {
            pipeline.pump();
        }
    }
}

fn open_contexts(
    backend: &dyn AudioBackend,
    settings: &HostSettings,
    res: &mut HostResources,
) -> Result<DeviceReady> {
    let input = backend.open_input(
        settings.capture_sample_rate,
        settings.preferred_input_device.as_deref(),
    )?;
    let input_rate = input.sample_rate();
    res.input = Some(input);

    let mut output = backend.open_output(settings.playback_sample_rate)?;
    let output_rate = output.sample_rate();
    let scheduler = PlaybackScheduler::new(output.clock(), output_rate).shared();
    let connected = output.connect(PlaybackRenderer::new(Arc::clone(&scheduler)));
    res.output = Some(output);
    connected?;

    info!(input_rate, output_rate, "device contexts open");
    Ok(DeviceReady {
        scheduler,
        input_rate,
        output_rate,
    })
}

fn acquire_microphone(res: &mut HostResources) -> Result<()> {
    let Some(input) = res.input.as_mut() else {
        return Err(NexaError::MicrophoneUnavailable(
            "input context is not open".into(),
        ));
    };
    if res.microphone.is_some() {
        return Ok(());
    }

    let (producer, consumer) = create_audio_ring();
    res.gate.store(false, Ordering::Release);
    let mic = input.request_microphone(producer, Arc::clone(&res.gate))?;
    res.microphone = Some(mic);
    res.consumer = Some(consumer);
    Ok(())
}

fn start_capture(
    res: &mut HostResources,
    settings: &HostSettings,
    diagnostics: &Arc<CaptureDiagnostics>,
    sink: UnboundedSender<TransportChunk>,
) {
    if res.pipeline.is_some() {
        debug!("capture already wired");
        return;
    }
    let (Some(consumer), Some(input)) = (res.consumer.take(), res.input.as_ref()) else {
        warn!("capture requested without a microphone stream");
        return;
    };

    match CapturePipeline::new(
        consumer,
        input.sample_rate(),
        settings.capture_sample_rate,
        settings.frame_len,
        sink,
        Arc::clone(diagnostics),
    ) {
        Ok(pipeline) => {
            res.pipeline = Some(pipeline);
            res.gate.store(true, Ordering::Release);
        }
        Err(e) => error!("failed to wire capture pipeline: {e}"),
    }
}
