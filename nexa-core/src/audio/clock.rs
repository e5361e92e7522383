//! Output clocks — the scheduling reference for playback start times.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::codec::frames_to_duration;

/// Monotonic time source belonging to a playback device context.
pub trait OutputClock: Send + Sync + 'static {
    /// Time elapsed on the output device since the context was opened.
    fn now(&self) -> Duration;
}

/// Clock driven by the output callback: time = frames rendered / rate.
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Frames handed to the device so far.
    pub fn position(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Called by the output callback after each rendered buffer.
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl OutputClock for FrameClock {
    fn now(&self) -> Duration {
        frames_to_duration(self.position(), self.sample_rate)
    }
}

/// Hand-driven clock for contexts with no real device behind them.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(now.as_nanos() as u64, Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}
