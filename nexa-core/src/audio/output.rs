//! cpal output context.
//!
//! The output callback asks the [`PlaybackRenderer`] for one buffer starting
//! at the clock's current frame, then advances the clock by the frames it
//! wrote. Device time therefore equals frames rendered / rate.

use std::sync::Arc;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{clock::FrameClock, OutputClock, OutputContext};
use crate::{
    error::{NexaError, Result},
    playback::PlaybackRenderer,
};

/// Playback-side device context backed by the default cpal output device.
pub struct CpalOutputContext {
    device: Option<Device>,
    config: StreamConfig,
    sample_format: SampleFormat,
    clock: Arc<FrameClock>,
    stream: Option<Stream>,
}

impl CpalOutputContext {
    /// Open the default output device, at `preferred_rate` when supported.
    pub fn open(preferred_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(NexaError::NoDefaultOutputDevice)?;

        let default = device
            .default_output_config()
            .map_err(|e| NexaError::AudioDevice(e.to_string()))?;

        let native = device
            .supported_output_configs()
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
            device = device.name().unwrap_or_default().as_str(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?sample_format,
            "output context ready"
        );

        Ok(Self {
            device: Some(device),
            clock: Arc::new(FrameClock::new(config.sample_rate.0)),
            config,
            sample_format,
            stream: None,
        })
    }
}

impl OutputContext for CpalOutputContext {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    fn connect(&mut self, renderer: PlaybackRenderer) -> Result<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| NexaError::AudioStream("output context is closed".into()))?;
        let config = self.config.clone();
        let ch = config.channels.max(1) as usize;
        let clock = Arc::clone(&self.clock);

        let stream = match self.sample_format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    renderer.render(data, ch, clock.position());
                    clock.advance((data.len() / ch) as u64);
                },
                |err| error!("output stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info| {
                        mix_buf.resize(data.len(), 0.0);
                        renderer.render(&mut mix_buf, ch, clock.position());
                        for (dst, src) in data.iter_mut().zip(&mix_buf) {
                            *dst = (src * 32768.0) as i16;
                        }
                        clock.advance((data.len() / ch) as u64);
                    },
                    |err| error!("output stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(NexaError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| NexaError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| NexaError::AudioStream(e.to_string()))?;

        self.stream = Some(stream);
        info!("playback stream connected");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("failed to pause output stream: {e}");
            }
        }
        if self.device.take().is_some() {
            info!("output context closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for CpalOutputContext {
    fn drop(&mut self) {
        self.close();
    }
}
