//! Time-ordered playback of inbound model audio.
//!
//! ```text
//! event loop:      TransportChunk ─► PlaybackDecoder::prepare ─► PreparedAudio
//!                  (decode + streaming resample, no lock held)
//!                                   ─► lock ─► schedule at max(cursor, clock.now())
//!                                                                  │
//! output callback ─► PlaybackRenderer::render ─► mix active units ─┘
//! ```
//!
//! The scheduler lock only covers timeline bookkeeping, so the output
//! callback's `try_lock` is contended for microseconds, never for a decode.
//!
//! The cursor only moves forward between interrupts, so consecutive chunks
//! play back-to-back with no gap or overlap. An interrupt stops every unit
//! and rewinds the cursor to zero; the next chunk then starts at the clock's
//! current time because `now > 0`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    audio::{clock::OutputClock, resample::RateConverter},
    codec::{
        duration_to_frames, frames_to_duration, transport_chunk_to_float_frames, TransportChunk,
        DEFAULT_PLAYBACK_RATE,
    },
    error::Result,
};

/// Converter input block: 20 ms of 24 kHz model audio.
const DECODE_BLOCK: usize = 480;

/// Scheduler shared between the event loop and the output callback.
pub type SharedScheduler = Arc<Mutex<PlaybackScheduler>>;

/// Cancellation handle for one scheduled unit. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl PlaybackHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Silence the unit. Stopping a finished or already stopped unit is a no-op.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Where a chunk landed on the timeline.
#[derive(Debug, Clone)]
pub struct ScheduledUnit {
    pub id: u64,
    pub start: Duration,
    pub duration: Duration,
    pub handle: PlaybackHandle,
}

impl ScheduledUnit {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub active_units: usize,
    pub cursor: Duration,
    pub now: Duration,
}

struct PlaybackUnit {
    handle: PlaybackHandle,
    start_frame: u64,
    /// Mono, at the output rate.
    samples: Vec<f32>,
}

impl PlaybackUnit {
    fn len(&self) -> u64 {
        self.samples.len() as u64
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.len()
    }
}

/// Model audio decoded and converted to the output rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PreparedAudio {
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.samples.len() as u64, self.sample_rate)
    }
}

/// Turns inbound chunks into output-rate audio.
///
/// Owned by the event loop and run outside the scheduler lock. One streaming
/// converter serves the whole model turn, so chunk boundaries carry no
/// filter warm-up or lost tail.
pub struct PlaybackDecoder {
    output_rate: u32,
    /// Source rate the converter was built for, and the converter.
    converter: Option<(u32, RateConverter)>,
}

impl PlaybackDecoder {
    pub fn new(output_rate: u32) -> Self {
        Self {
            output_rate,
            converter: None,
        }
    }

    /// Decode one chunk. The `rate=` mime parameter gives its sample rate
    /// (24 kHz when absent); audio is treated as mono.
    ///
    /// A resampled chunk may come back shorter than its input: the last
    /// partial block is held until the next chunk or [`flush`](Self::flush).
    ///
    /// # Errors
    /// `NexaError::Decode` on malformed payloads; converter state is untouched.
    pub fn prepare(&mut self, chunk: &TransportChunk) -> Result<PreparedAudio> {
        let rate = chunk.sample_rate().unwrap_or(DEFAULT_PLAYBACK_RATE);
        let frames = transport_chunk_to_float_frames(chunk, rate, 1)?;
        let mono = frames.channels.into_iter().next().unwrap_or_default();

        let samples = if rate == self.output_rate {
            mono
        } else {
            if !matches!(&self.converter, Some((source, _)) if *source == rate) {
                let converter = RateConverter::new(rate, self.output_rate, DECODE_BLOCK)?;
                self.converter = Some((rate, converter));
            }
            match self.converter.as_mut() {
                Some((_, converter)) => converter.process(&mono),
                None => mono,
            }
        };

        Ok(PreparedAudio {
            samples,
            sample_rate: self.output_rate,
        })
    }

    /// Release audio held back by the converter. Called when a model turn ends.
    pub fn flush(&mut self) -> Option<PreparedAudio> {
        let (_, converter) = self.converter.as_mut()?;
        let samples = converter.flush();
        (!samples.is_empty()).then(|| PreparedAudio {
            samples,
            sample_rate: self.output_rate,
        })
    }

    /// Drop held audio and filter history. Called on interrupt.
    pub fn reset(&mut self) {
        if let Some((_, converter)) = self.converter.as_mut() {
            converter.reset();
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

/// Owns the virtual timeline and every in-flight playback unit.
pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    sample_rate: u32,
    cursor: Duration,
    units: Vec<PlaybackUnit>,
    next_id: u64,
}

impl PlaybackScheduler {
    /// `sample_rate` is the output context's rate; every unit is stored at it.
    pub fn new(clock: Arc<dyn OutputClock>, sample_rate: u32) -> Self {
        Self {
            clock,
            sample_rate,
            cursor: Duration::ZERO,
            units: Vec::new(),
            next_id: 0,
        }
    }

    /// Wrap in the shared form handed to the renderer.
    pub fn shared(self) -> SharedScheduler {
        Arc::new(Mutex::new(self))
    }

    /// Place prepared audio after everything already queued.
    ///
    /// `audio` must be at this scheduler's rate, as produced by a
    /// [`PlaybackDecoder`] built with [`sample_rate`](Self::sample_rate).
    pub fn schedule(&mut self, audio: PreparedAudio) -> ScheduledUnit {
        let len = audio.samples.len() as u64;
        let duration = frames_to_duration(len, self.sample_rate);

        let start = self.cursor.max(self.clock.now());
        self.cursor = start + duration;

        let id = self.next_id;
        self.next_id += 1;
        let handle = PlaybackHandle::new(id);

        if len > 0 {
            self.units.push(PlaybackUnit {
                handle: handle.clone(),
                start_frame: duration_to_frames(start, self.sample_rate),
                samples: audio.samples,
            });
        }

        debug!(
            id,
            start_ms = start.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            "playback unit scheduled"
        );

        ScheduledUnit {
            id,
            start,
            duration,
            handle,
        }
    }

    /// Stop all playing and queued audio and rewind the cursor.
    pub fn interrupt(&mut self) {
        let stopped = self.units.len();
        for unit in self.units.drain(..) {
            unit.handle.stop();
        }
        self.cursor = Duration::ZERO;
        info!(stopped, "playback interrupted");
    }

    /// Drop every unit without reporting an interrupt. Used at teardown.
    pub fn clear(&mut self) {
        for unit in self.units.drain(..) {
            unit.handle.stop();
        }
        self.cursor = Duration::ZERO;
    }

    /// Mix every active unit overlapping `[start_frame, start_frame + frames)`
    /// into the interleaved `out` buffer, then retire finished and cancelled units.
    pub fn render(&mut self, out: &mut [f32], channels: usize, start_frame: u64) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let window_end = start_frame + frames;

        for unit in &self.units {
            if unit.handle.is_stopped() {
                continue;
            }
            let from = unit.start_frame.max(start_frame);
            let to = unit.end_frame().min(window_end);
            if from >= to {
                continue;
            }
            for frame in from..to {
                let sample = unit.samples[(frame - unit.start_frame) as usize];
                let dst = (frame - start_frame) as usize * channels;
                for slot in &mut out[dst..dst + channels] {
                    *slot += sample;
                }
            }
        }

        self.units
            .retain(|unit| !unit.handle.is_stopped() && unit.end_frame() > window_end);
    }

    pub fn cursor(&self) -> Duration {
        self.cursor
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_units(&self) -> usize {
        self.units.len()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            active_units: self.units.len(),
            cursor: self.cursor,
            now: self.clock.now(),
        }
    }
}

/// The output callback's view of the scheduler.
///
/// Uses `try_lock` so the audio thread never waits on the event loop; a
/// contended buffer is rendered as silence.
#[derive(Clone)]
pub struct PlaybackRenderer {
    scheduler: SharedScheduler,
}

impl PlaybackRenderer {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self { scheduler }
    }

    pub fn render(&self, out: &mut [f32], channels: usize, start_frame: u64) {
        match self.scheduler.try_lock() {
            Some(mut scheduler) => scheduler.render(out, channels, start_frame),
            None => out.fill(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clock::ManualClock;
    use crate::codec::{encode_transport, float_to_pcm16_le};
    use approx::assert_abs_diff_eq;

    /// A 24 kHz mono chunk of `ms` milliseconds at constant `level`.
    fn chunk_ms(ms: u64, level: f32) -> TransportChunk {
        let samples = vec![level; (24 * ms) as usize];
        TransportChunk::new(
            "audio/pcm;rate=24000",
            encode_transport(&float_to_pcm16_le(&samples)),
        )
    }

    fn scheduler() -> (Arc<ManualClock>, PlaybackScheduler) {
        let clock = Arc::new(ManualClock::new());
        let sched = PlaybackScheduler::new(clock.clone(), 24_000);
        (clock, sched)
    }

    fn enqueue(sched: &mut PlaybackScheduler, chunk: &TransportChunk) -> ScheduledUnit {
        let audio = PlaybackDecoder::new(sched.sample_rate())
            .prepare(chunk)
            .unwrap();
        sched.schedule(audio)
    }

    #[test]
    fn consecutive_chunks_are_contiguous() {
        let (_clock, mut sched) = scheduler();
        let starts: Vec<Duration> = (0..3)
            .map(|_| enqueue(&mut sched, &chunk_ms(100, 0.1)).start)
            .collect();
        assert_eq!(
            starts,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200)
            ]
        );
        assert_eq!(sched.cursor(), Duration::from_millis(300));
        assert_eq!(sched.active_units(), 3);
    }

    #[test]
    fn interrupt_then_enqueue_starts_at_clock_time() {
        let (clock, mut sched) = scheduler();
        let first = enqueue(&mut sched, &chunk_ms(1_000, 0.1));
        let second = enqueue(&mut sched, &chunk_ms(1_000, 0.1));

        clock.set(Duration::from_millis(500));
        sched.interrupt();

        assert!(first.handle.is_stopped());
        assert!(second.handle.is_stopped());
        assert_eq!(sched.active_units(), 0);
        assert_eq!(sched.cursor(), Duration::ZERO);

        let next = enqueue(&mut sched, &chunk_ms(100, 0.1));
        assert_eq!(next.start, Duration::from_millis(500));
        assert_eq!(sched.cursor(), Duration::from_millis(600));
    }

    #[test]
    fn late_chunk_starts_immediately() {
        let (clock, mut sched) = scheduler();
        enqueue(&mut sched, &chunk_ms(100, 0.1));
        clock.set(Duration::from_millis(350));
        let unit = enqueue(&mut sched, &chunk_ms(100, 0.1));
        assert_eq!(unit.start, Duration::from_millis(350));
    }

    #[test]
    fn decode_failure_leaves_timeline_alone() {
        let (_clock, mut sched) = scheduler();
        enqueue(&mut sched, &chunk_ms(100, 0.1));
        let bad = TransportChunk::new("audio/pcm;rate=24000", "!!not base64!!");
        assert!(PlaybackDecoder::new(24_000).prepare(&bad).is_err());
        assert_eq!(sched.cursor(), Duration::from_millis(100));
        assert_eq!(sched.active_units(), 1);
    }

    #[test]
    fn render_mixes_and_retires_finished_units() {
        let (_clock, mut sched) = scheduler();
        // 10 ms = 240 frames.
        enqueue(&mut sched, &chunk_ms(10, 0.5));

        let mut out = vec![0f32; 2 * 160];
        sched.render(&mut out, 2, 0);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1.0 / 32768.0);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1.0 / 32768.0);
        assert_eq!(sched.active_units(), 1);

        sched.render(&mut out, 2, 160);
        // Frames 160..240 carry audio, 240..320 are silent.
        assert_abs_diff_eq!(out[2 * 79], 0.5, epsilon = 1.0 / 32768.0);
        assert_eq!(out[2 * 80], 0.0);
        assert_eq!(sched.active_units(), 0);
    }

    #[test]
    fn stopped_unit_renders_silence_and_is_removed() {
        let (_clock, mut sched) = scheduler();
        let unit = enqueue(&mut sched, &chunk_ms(10, 0.5));
        unit.handle.stop();
        unit.handle.stop();

        let mut out = vec![1f32; 64];
        sched.render(&mut out, 1, 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(sched.active_units(), 0);
    }

    #[test]
    fn resamples_to_output_rate() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = PlaybackScheduler::new(clock, 48_000);
        let mut decoder = PlaybackDecoder::new(sched.sample_rate());
        let unit = sched.schedule(decoder.prepare(&chunk_ms(100, 0.1)).unwrap());
        let ms = unit.duration.as_secs_f64() * 1_000.0;
        assert!((ms - 100.0).abs() < 1.0, "duration={ms}ms");
    }

    #[test]
    fn resampled_chunks_join_without_a_silent_seam() {
        let mut decoder = PlaybackDecoder::new(48_000);
        let first = decoder.prepare(&chunk_ms(100, 0.5)).unwrap();
        let second = decoder.prepare(&chunk_ms(100, 0.5)).unwrap();
        assert!(first.duration() > Duration::from_millis(95));

        let joined: Vec<f32> = first.samples.iter().chain(&second.samples).copied().collect();
        assert!(joined.len() > 9_500, "len={}", joined.len());
        // Past the converter's start-up delay every sample carries the level.
        let quiet = joined[64..]
            .iter()
            .filter(|s| (**s - 0.5).abs() > 1e-3)
            .count();
        assert_eq!(quiet, 0);
    }

    #[test]
    fn flush_releases_held_tail_and_reset_drops_it() {
        let mut decoder = PlaybackDecoder::new(48_000);
        // 5 ms = 120 input samples, below one converter block.
        assert!(decoder.prepare(&chunk_ms(5, 0.5)).unwrap().samples.is_empty());
        let tail = decoder.flush().expect("held tail");
        assert!(tail.samples.iter().any(|s| (s - 0.5).abs() < 1e-3));
        assert!(decoder.flush().is_none());

        decoder.prepare(&chunk_ms(5, 0.5)).unwrap();
        decoder.reset();
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn same_rate_decoder_passes_through() {
        let mut decoder = PlaybackDecoder::new(24_000);
        let audio = decoder.prepare(&chunk_ms(10, 0.5)).unwrap();
        assert_eq!(audio.samples.len(), 240);
        assert_eq!(audio.duration(), Duration::from_millis(10));
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn renderer_reports_silence_when_contended() {
        let (_clock, mut sched) = scheduler();
        enqueue(&mut sched, &chunk_ms(10, 0.5));
        let shared = sched.shared();
        let renderer = PlaybackRenderer::new(Arc::clone(&shared));

        let guard = shared.lock();
        let mut out = vec![1f32; 32];
        renderer.render(&mut out, 1, 0);
        assert!(out.iter().all(|s| *s == 0.0));
        drop(guard);

        renderer.render(&mut out, 1, 0);
        assert!(out[0] > 0.0);
    }

    #[test]
    fn rendering_continues_while_a_long_chunk_is_decoded() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = PlaybackScheduler::new(clock, 48_000);
        let mut decoder = PlaybackDecoder::new(48_000);
        sched.schedule(decoder.prepare(&chunk_ms(10_000, 0.5)).unwrap());
        let shared = sched.shared();
        let renderer = PlaybackRenderer::new(Arc::clone(&shared));

        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let shared = Arc::clone(&shared);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut decoder = PlaybackDecoder::new(48_000);
                let audio = decoder.prepare(&chunk_ms(60_000, 0.25)).unwrap();
                shared.lock().schedule(audio);
                done.store(true, Ordering::Release);
            })
        };

        let mut out = vec![0f32; 480];
        let mut frame = 48_000u64;
        let (mut rendered, mut silent) = (0usize, 0usize);
        loop {
            let finished = done.load(Ordering::Acquire);
            renderer.render(&mut out, 1, frame);
            rendered += 1;
            if out.iter().all(|s| *s == 0.0) {
                silent += 1;
            }
            if finished {
                break;
            }
            // Stay inside the first unit so it is never retired.
            frame = 48_000 + (frame + 480) % (48_000 * 8);
        }
        worker.join().unwrap();

        assert!(rendered > 0);
        // At most the one buffer that raced the short scheduling lock.
        assert!(silent <= 1, "rendered={rendered} silent={silent}");
        assert_eq!(shared.lock().active_units(), 2);
    }

    #[test]
    fn snapshot_reflects_clock_and_cursor() {
        let (clock, mut sched) = scheduler();
        enqueue(&mut sched, &chunk_ms(200, 0.1));
        clock.set(Duration::from_millis(50));
        assert_eq!(
            sched.snapshot(),
            PlaybackSnapshot {
                active_units: 1,
                cursor: Duration::from_millis(200),
                now: Duration::from_millis(50),
            }
        );
        sched.clear();
        assert_eq!(sched.snapshot().active_units, 0);
        assert_eq!(sched.cursor(), Duration::ZERO);
    }
}
