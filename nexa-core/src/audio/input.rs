//! cpal input context and microphone stream.
//!
//! The microphone callback runs on an OS audio thread at elevated priority.
//! It down-mixes to mono into a scratch buffer sized on the first callback and
//! pushes into the SPSC ring; it never blocks. When the gate is closed it
//! returns immediately, which is how "disconnecting the processing node"
//! silences capture before the stream itself is dropped.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{InputContext, MicrophoneStream};
use crate::{
    buffering::{AudioProducer, Producer},
    error::{NexaError, Result},
};

/// Capture-side device context backed by a cpal input device.
pub struct CpalInputContext {
    device: Option<Device>,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl CpalInputContext {
    /// Resolve the input device by preferred name, otherwise fall back to
    /// the default input device and then the first available device.
    ///
    /// The device runs at `preferred_rate` when it supports it; otherwise at
    /// its default rate and the capture pipeline resamples.
    pub fn open(preferred_rate: u32, preferred_device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| NexaError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(NexaError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input context"
        );

        let default = device
            .default_input_config()
            .map_err(|e| NexaError::AudioDevice(e.to_string()))?;

        let native = device
            .supported_input_configs()
            .ok()
            .and_then(|mut ranges| {
                ranges.find(|r| {
                    r.min_sample_rate().0 <= preferred_rate
                        && r.max_sample_rate().0 >= preferred_rate
                        && r.sample_format() == default.sample_format()
                })
            })
            .map(|r| r.with_sample_rate(SampleRate(preferred_rate)));

        let supported = native.unwrap_or(default);
        let sample_format = supported.sample_format();
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?sample_format,
            "input context ready"
        );

        Ok(Self {
            device: Some(device),
            config,
            sample_format,
        })
    }
}

impl InputContext for CpalInputContext {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn request_microphone(
        &mut self,
        mut producer: AudioProducer,
        gate: Arc<AtomicBool>,
    ) -> Result<Box<dyn MicrophoneStream>> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| NexaError::MicrophoneUnavailable("input context is closed".into()))?;
        let config = self.config.clone();
        let ch = config.channels.max(1) as usize;
        let gate_cb = Arc::clone(&gate);
        let mut mix_buf: Vec<f32> = Vec::new();

        // One conversion per format; everything lands as mono f32 in `mix_buf`.
        let mut push_mono = move |frames: usize, sample_at: &dyn Fn(usize) -> f32| {
            mix_buf.resize(frames, 0.0);
            for (f, slot) in mix_buf.iter_mut().enumerate() {
                let base = f * ch;
                let mut sum = 0f32;
                for c in 0..ch {
                    sum += sample_at(base + c);
                }
                *slot = sum / ch as f32;
            }
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
            }
        };

        let stream = match self.sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !gate_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    push_mono(data.len() / ch, &|i| data[i]);
                },
                |err| error!("microphone stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !gate_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    push_mono(data.len() / ch, &|i| data[i] as f32 / 32768.0);
                },
                |err| error!("microphone stream error: {err}"),
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    if !gate_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    push_mono(data.len() / ch, &|i| (data[i] as f32 - 128.0) / 128.0);
                },
                |err| error!("microphone stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(NexaError::MicrophoneUnavailable(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| NexaError::MicrophoneUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| NexaError::MicrophoneUnavailable(e.to_string()))?;

        info!("microphone stream acquired");

        Ok(Box::new(CpalMicrophone {
            stream: Some(stream),
            gate,
        }))
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            info!("input context closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.device.is_none()
    }
}

/// Handle to an active microphone stream.
///
/// **Not `Send`** — create and drop on the device host thread.
pub struct CpalMicrophone {
    stream: Option<Stream>,
    gate: Arc<AtomicBool>,
}

impl MicrophoneStream for CpalMicrophone {
    fn stop(&mut self) {
        self.gate.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("failed to pause microphone stream: {e}");
            }
            drop(stream);
            info!("microphone stream stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
