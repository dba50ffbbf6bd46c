//! Stretch engine: rate and pitch independent rendering of a sample buffer
//!
//! Split into two halves the same way as every render component:
//!
//! - [`StretchEngine`] (control thread) merges declarative [`Schedule`]
//!   updates and pushes them over an `rtrb` ringbuffer
//! - [`StretchNode`] (render thread) owns the cursor and the stretcher, and
//!   applies schedules at block boundaries
//!
//! Both share a [`StretchClock`]. The cursor is addressed in the original,
//! unstretched timeline ("input time"), which makes it the authoritative
//! clock the sync loop aligns everything else to.
//!
//! # Seek precision
//!
//! A seek stores its target in the clock before `schedule` returns, tagged
//! with a new generation. The render thread only publishes its own cursor
//! once it has adopted that generation, so a clock read right after a seek
//! always returns exactly the requested time.
//!
//! # Full queue
//!
//! Every update carries the complete merged state. If the ring is full (the
//! render side has stopped pulling), the engine keeps only the latest update,
//! including the most recent seek, and sends it on the next
//! [`StretchEngine::flush`] or `schedule` once there is room.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::error::{EngineError, EngineResult};
use crate::audio::MAX_BUFFER_SIZE;
use crate::timestretch::TimeStretcher;
use crate::types::{SampleBuffer, StereoBuffer};

/// Schedule queue capacity
const SCHEDULE_QUEUE_CAPACITY: usize = 64;

/// Fastest supported input consumption (input frames per output frame)
pub const MAX_INPUT_RATIO: f64 = 4.0;

/// Slowest supported input consumption
pub const MIN_INPUT_RATIO: f64 = 1.0 / 16.0;

/// Input scratch size: the largest block at the fastest ratio, plus rounding
const INPUT_CAPACITY: usize = MAX_BUFFER_SIZE * MAX_INPUT_RATIO as usize + 1;

/// Shared clock between the control and render halves
///
/// Lock-free; the render side never blocks on it.
#[derive(Debug)]
pub struct StretchClock {
    /// Seek target written by the control side (f64 bits)
    seek_time: AtomicU64,
    /// Incremented on every seek
    seek_generation: AtomicU64,
    /// Render cursor in source frames
    render_position: AtomicU64,
    /// Seek generation the render cursor belongs to
    render_generation: AtomicU64,
    /// Source sample rate used to convert frames to seconds
    source_rate: u32,
    active: AtomicBool,
    at_end: AtomicBool,
}

impl StretchClock {
    fn new(source_rate: u32) -> Self {
        Self {
            seek_time: AtomicU64::new(0f64.to_bits()),
            seek_generation: AtomicU64::new(0),
            render_position: AtomicU64::new(0),
            render_generation: AtomicU64::new(0),
            source_rate: source_rate.max(1),
            active: AtomicBool::new(false),
            at_end: AtomicBool::new(false),
        }
    }

    /// Current input time in seconds
    pub fn input_time(&self) -> f64 {
        let seek_generation = self.seek_generation.load(Ordering::Acquire);
        if self.render_generation.load(Ordering::Acquire) == seek_generation {
            self.render_position.load(Ordering::Relaxed) as f64 / self.source_rate as f64
        } else {
            f64::from_bits(self.seek_time.load(Ordering::Relaxed))
        }
    }

    /// Whether the node is rendering
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Whether the cursor has reached the end of the buffer
    pub fn is_at_end(&self) -> bool {
        self.at_end.load(Ordering::Relaxed)
    }

    /// Control side: record a seek, returns its generation
    fn begin_seek(&self, time: f64) -> u64 {
        self.seek_time.store(time.to_bits(), Ordering::Relaxed);
        self.at_end.store(false, Ordering::Relaxed);
        self.seek_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Render side: publish the cursor for the generation it belongs to
    fn publish(&self, position: u64, generation: u64) {
        self.render_position.store(position, Ordering::Relaxed);
        self.render_generation.store(generation, Ordering::Release);
    }
}

/// Declarative stretch state update
///
/// Every field is optional; omitted fields keep their last scheduled value.
/// A present `input` is a hard seek.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Schedule {
    /// Render (true) or pause in place (false)
    pub active: Option<bool>,
    /// Cursor position in seconds of the original timeline
    pub input: Option<f64>,
    /// Temporal stretch factor (1.0 = original speed)
    pub rate: Option<f64>,
    /// Pitch shift in semitones
    pub semitones: Option<f64>,
    /// Loop region start in seconds
    pub loop_start: Option<f64>,
    /// Loop region end in seconds
    pub loop_end: Option<f64>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn with_input(mut self, seconds: f64) -> Self {
        self.input = Some(seconds);
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_semitones(mut self, semitones: f64) -> Self {
        self.semitones = Some(semitones);
        self
    }

    pub fn with_loop(mut self, start: f64, end: f64) -> Self {
        self.loop_start = Some(start);
        self.loop_end = Some(end);
        self
    }
}

/// Merged state after applying every schedule so far
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledState {
    pub active: bool,
    pub rate: f64,
    pub semitones: f64,
    pub loop_start: Option<f64>,
    pub loop_end: Option<f64>,
}

impl Default for ScheduledState {
    fn default() -> Self {
        Self {
            active: false,
            rate: 1.0,
            semitones: 0.0,
            loop_start: None,
            loop_end: None,
        }
    }
}

impl ScheduledState {
    fn merge(&mut self, schedule: &Schedule) {
        if let Some(active) = schedule.active {
            self.active = active;
        }
        match schedule.rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => self.rate = rate,
            Some(rate) => log::warn!("StretchEngine: ignoring invalid rate {}", rate),
            None => {}
        }
        match schedule.semitones {
            Some(semitones) if semitones.is_finite() => self.semitones = semitones,
            Some(semitones) => log::warn!("StretchEngine: ignoring invalid pitch {}", semitones),
            None => {}
        }
        if schedule.loop_start.is_some() {
            self.loop_start = schedule.loop_start.filter(|t| t.is_finite());
        }
        if schedule.loop_end.is_some() {
            self.loop_end = schedule.loop_end.filter(|t| t.is_finite());
        }
    }

    /// Loop region if both bounds are set and describe a non-empty span
    pub fn loop_region(&self, duration: f64) -> Option<(f64, f64)> {
        match (self.loop_start, self.loop_end) {
            (Some(start), Some(end)) if start >= 0.0 && start < end && end <= duration => {
                Some((start, end))
            }
            _ => None,
        }
    }
}

/// Latest update the queue had no room for
#[derive(Debug, Clone, Copy)]
struct PendingUpdate {
    state: ScheduledState,
    seek: Option<(f64, u64)>,
}

/// Commands sent from the control half to the render half
enum StretchCommand {
    /// Full merged state, with an optional seek target and its generation
    Update {
        state: ScheduledState,
        seek: Option<(f64, u64)>,
    },
    /// Release the buffer and go silent
    Detach,
}

/// Create a linked control/render pair for `buffer` at `output_rate`
pub fn stretch_pair(buffer: Arc<SampleBuffer>, output_rate: u32) -> (StretchEngine, StretchNode) {
    let (command_tx, command_rx) = rtrb::RingBuffer::new(SCHEDULE_QUEUE_CAPACITY);
    let source_rate = buffer.sample_rate();
    let clock = Arc::new(StretchClock::new(source_rate));
    let duration = buffer.duration_seconds();

    let mut stretcher = TimeStretcher::new_with_sample_rate(output_rate);
    stretcher.set_pitch_semitones(TimeStretcher::rate_correction_semitones(
        source_rate,
        output_rate,
    ));

    let engine = StretchEngine {
        command_tx,
        clock: clock.clone(),
        state: ScheduledState::default(),
        pending: None,
        duration,
        attached: true,
    };

    let node = StretchNode {
        command_rx,
        clock,
        frames: buffer.frames(),
        buffer: Some(buffer),
        stretcher,
        source_rate,
        output_rate,
        state: ScheduledState::default(),
        loop_frames: None,
        cursor: 0,
        generation: 0,
        fraction: 0.0,
        input: StereoBuffer::silence(INPUT_CAPACITY),
    };

    (engine, node)
}

/// Control half of the stretch engine
pub struct StretchEngine {
    command_tx: rtrb::Producer<StretchCommand>,
    clock: Arc<StretchClock>,
    state: ScheduledState,
    pending: Option<PendingUpdate>,
    duration: f64,
    attached: bool,
}

impl StretchEngine {
    /// Apply a declarative update
    ///
    /// Updates are applied by the render thread in call order. A seek is
    /// visible through [`input_time`](Self::input_time) immediately. Fails
    /// only once the engine is detached.
    pub fn schedule(&mut self, schedule: Schedule) -> EngineResult<()> {
        if !self.attached {
            return Err(EngineError::ScheduleFailure);
        }

        let mut state = self.state;
        state.merge(&schedule);

        let seek = match schedule.input.filter(|t| !t.is_nan()) {
            Some(t) => {
                let t = t.clamp(0.0, self.duration);
                Some((t, self.clock.begin_seek(t)))
            }
            // A held seek must survive later updates that do not move the cursor
            None => self.pending.and_then(|p| p.seek),
        };

        self.state = state;
        self.clock.active.store(state.active, Ordering::Relaxed);
        self.pending = Some(PendingUpdate { state, seek });
        self.flush();
        Ok(())
    }

    /// Send the held update if the queue has room again
    ///
    /// Returns false while the update is still waiting.
    pub fn flush(&mut self) -> bool {
        let Some(update) = self.pending else {
            return true;
        };
        let command = StretchCommand::Update {
            state: update.state,
            seek: update.seek,
        };
        if self.command_tx.push(command).is_err() {
            log::debug!("StretchEngine: schedule queue full, holding latest update");
            return false;
        }
        self.pending = None;
        true
    }

    /// Whether an update is waiting for queue space
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Authoritative position in the original timeline (seconds)
    pub fn input_time(&self) -> f64 {
        self.clock.input_time().clamp(0.0, self.duration)
    }

    /// Last merged state
    pub fn state(&self) -> &ScheduledState {
        &self.state
    }

    pub fn clock(&self) -> &Arc<StretchClock> {
        &self.clock
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Deactivate the node and release its buffer
    ///
    /// Later schedules fail with [`EngineError::ScheduleFailure`].
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.pending = None;
        self.state.active = false;
        self.clock.active.store(false, Ordering::Relaxed);
        if self.command_tx.push(StretchCommand::Detach).is_err() {
            log::warn!("StretchEngine: schedule queue full, detach dropped");
        }
    }
}

/// Render half of the stretch engine
pub struct StretchNode {
    command_rx: rtrb::Consumer<StretchCommand>,
    clock: Arc<StretchClock>,
    buffer: Option<Arc<SampleBuffer>>,
    frames: usize,
    stretcher: TimeStretcher,
    source_rate: u32,
    output_rate: u32,
    state: ScheduledState,
    /// Loop region in source frames
    loop_frames: Option<(usize, usize)>,
    /// Next source frame to feed the stretcher
    cursor: usize,
    /// Seek generation the cursor belongs to
    generation: u64,
    /// Fractional input frames carried between blocks
    fraction: f64,
    /// Pre-allocated input scratch
    input: StereoBuffer,
}

impl StretchNode {
    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.pop() {
            match command {
                StretchCommand::Update { state, seek } => self.apply(state, seek),
                StretchCommand::Detach => {
                    self.state.active = false;
                    self.buffer = None;
                    self.clock.active.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn apply(&mut self, state: ScheduledState, seek: Option<(f64, u64)>) {
        if state.semitones != self.state.semitones {
            let correction = TimeStretcher::rate_correction_semitones(self.source_rate, self.output_rate);
            self.stretcher.set_pitch_semitones(state.semitones + correction);
        }

        let duration = self.frames as f64 / self.source_rate.max(1) as f64;
        self.loop_frames = state.loop_region(duration).map(|(start, end)| {
            (
                self.seconds_to_frames(start),
                self.seconds_to_frames(end).min(self.frames),
            )
        });

        if let Some((time, generation)) = seek {
            self.cursor = self.seconds_to_frames(time).min(self.frames);
            self.generation = generation;
            self.fraction = 0.0;
            self.stretcher.reset();
            self.clock.at_end.store(false, Ordering::Relaxed);
            self.clock.publish(self.cursor as u64, generation);
        }

        self.state = state;
        self.clock.active.store(state.active, Ordering::Relaxed);
    }

    #[inline]
    fn seconds_to_frames(&self, seconds: f64) -> usize {
        (seconds * self.source_rate as f64).round().max(0.0) as usize
    }

    /// Fill `input` with `count` frames starting at the cursor
    fn gather(&mut self, count: usize) {
        self.input.set_len_from_capacity(count);
        let Some(buffer) = self.buffer.as_ref() else {
            self.input.fill_silence();
            return;
        };

        let mut pos = self.cursor;
        for i in 0..count {
            if let Some((start, end)) = self.loop_frames {
                if pos >= end {
                    pos = start + (pos - end);
                }
            }
            self.input[i] = buffer.stereo_frame(pos);
            pos += 1;
        }

        if let Some((start, end)) = self.loop_frames {
            if pos >= end {
                pos = start + (pos - end);
            }
        }
        self.cursor = pos.min(self.frames);
    }

    /// Render the next block into `output`
    pub fn render(&mut self, output: &mut StereoBuffer) {
        self.drain_commands();

        if !self.state.active || self.buffer.is_none() || self.cursor >= self.frames {
            output.fill_silence();
            if self.buffer.is_some() && self.cursor >= self.frames && !self.clock.is_at_end() {
                self.clock.at_end.store(true, Ordering::Relaxed);
            }
            return;
        }

        let ratio = TimeStretcher::input_ratio(self.state.rate, self.source_rate, self.output_rate)
            .clamp(MIN_INPUT_RATIO, MAX_INPUT_RATIO);
        let wanted = self.fraction + output.len() as f64 * ratio;
        let count = (wanted.floor() as usize).min(INPUT_CAPACITY);
        self.fraction = (wanted - count as f64).clamp(0.0, 1.0);

        self.gather(count);
        self.stretcher.process(&self.input, output);
        self.clock.publish(self.cursor as u64, self.generation);
    }

    /// Current cursor in source frames
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn tone(seconds: f64) -> Arc<SampleBuffer> {
        let frames = (seconds * RATE as f64) as usize;
        let samples = (0..frames)
            .map(|i| (i as f32 * 0.07).sin() * 0.5)
            .collect::<Vec<_>>();
        Arc::new(SampleBuffer::new(vec![samples.clone(), samples], RATE))
    }

    fn render_seconds(node: &mut StretchNode, seconds: f64) -> StereoBuffer {
        let blocks = (seconds * RATE as f64 / 128.0).round() as usize;
        let mut last = StereoBuffer::silence(128);
        for _ in 0..blocks {
            let mut out = StereoBuffer::silence(128);
            node.render(&mut out);
            last = out;
        }
        last
    }

    #[test]
    fn test_seek_visible_before_render() {
        let (mut engine, _node) = stretch_pair(tone(10.0), RATE);
        for &(rate, semitones) in &[(0.5, -12.0), (0.8, -2.49), (1.0, 0.0), (1.5, 7.0)] {
            for &t in &[0.0, 1.234567, 5.5, 9.99] {
                engine
                    .schedule(
                        Schedule::new()
                            .with_active(true)
                            .with_input(t)
                            .with_rate(rate)
                            .with_semitones(semitones),
                    )
                    .unwrap();
                assert_eq!(engine.input_time(), t);
            }
        }
    }

    #[test]
    fn test_full_queue_keeps_latest_seek() {
        let (mut engine, mut node) = stretch_pair(tone(10.0), RATE);
        for i in 0..100 {
            engine
                .schedule(
                    Schedule::new()
                        .with_active(true)
                        .with_input(i as f64 * 0.05)
                        .with_rate(0.5),
                )
                .unwrap();
        }
        assert!(engine.has_pending());
        assert_eq!(engine.input_time(), 99.0 * 0.05);

        // Stale seeks drained by the render side must not move the clock
        render_seconds(&mut node, 128.0 / RATE as f64);
        assert_eq!(engine.input_time(), 99.0 * 0.05);

        assert!(engine.flush());
        assert!(!engine.has_pending());
        render_seconds(&mut node, 1.0);
        let t = engine.input_time();
        assert!((t - 5.45).abs() < 0.01, "expected ~5.45s, got {}", t);
    }

    #[test]
    fn test_held_seek_survives_later_update() {
        let (mut engine, mut node) = stretch_pair(tone(10.0), RATE);
        for _ in 0..SCHEDULE_QUEUE_CAPACITY {
            engine.schedule(Schedule::new().with_rate(1.0)).unwrap();
        }
        engine.schedule(Schedule::new().with_input(3.0)).unwrap();
        engine
            .schedule(Schedule::new().with_active(true).with_rate(0.5))
            .unwrap();
        assert!(engine.has_pending());

        render_seconds(&mut node, 128.0 / RATE as f64);
        assert!(engine.flush());
        render_seconds(&mut node, 1.0);
        let t = engine.input_time();
        assert!((t - 3.5).abs() < 0.01, "expected ~3.5s, got {}", t);
    }

    #[test]
    fn test_seek_is_clamped_to_duration() {
        let (mut engine, _node) = stretch_pair(tone(2.0), RATE);
        engine.schedule(Schedule::new().with_input(5.0)).unwrap();
        assert_eq!(engine.input_time(), 2.0);
        engine.schedule(Schedule::new().with_input(-1.0)).unwrap();
        assert_eq!(engine.input_time(), 0.0);
    }

    #[test]
    fn test_clock_advances_at_rate() {
        let (mut engine, mut node) = stretch_pair(tone(10.0), RATE);
        engine
            .schedule(Schedule::new().with_active(true).with_input(0.0).with_rate(0.8))
            .unwrap();

        render_seconds(&mut node, 1.0);
        let t = engine.input_time();
        assert!((t - 0.8).abs() < 0.01, "expected ~0.8s, got {}", t);
    }

    #[test]
    fn test_inactive_holds_cursor() {
        let (mut engine, mut node) = stretch_pair(tone(10.0), RATE);
        engine
            .schedule(Schedule::new().with_active(true).with_input(1.0))
            .unwrap();
        render_seconds(&mut node, 0.5);
        engine.schedule(Schedule::new().with_active(false)).unwrap();

        let paused_at = {
            render_seconds(&mut node, 0.016);
            engine.input_time()
        };
        let out = render_seconds(&mut node, 0.5);
        assert_eq!(engine.input_time(), paused_at);
        assert_eq!(out.peak(), 0.0);
        assert!(!engine.clock().is_active());
    }

    #[test]
    fn test_omitted_fields_keep_last_value() {
        let (mut engine, _node) = stretch_pair(tone(1.0), RATE);
        engine
            .schedule(Schedule::new().with_rate(0.8).with_semitones(-2.49))
            .unwrap();
        engine.schedule(Schedule::new().with_active(true)).unwrap();

        let state = engine.state();
        assert_eq!(state.rate, 0.8);
        assert_eq!(state.semitones, -2.49);
        assert!(state.active);

        engine.schedule(Schedule::new().with_rate(-1.0)).unwrap();
        assert_eq!(engine.state().rate, 0.8);
    }

    #[test]
    fn test_end_of_buffer_goes_silent() {
        let (mut engine, mut node) = stretch_pair(tone(0.5), RATE);
        engine
            .schedule(Schedule::new().with_active(true).with_input(0.4))
            .unwrap();
        render_seconds(&mut node, 0.5);

        assert_eq!(engine.input_time(), 0.5);
        let out = render_seconds(&mut node, 0.1);
        assert_eq!(out.peak(), 0.0);
        assert!(engine.clock().is_at_end());
    }

    #[test]
    fn test_loop_region_wraps_cursor() {
        let (mut engine, mut node) = stretch_pair(tone(4.0), RATE);
        engine
            .schedule(
                Schedule::new()
                    .with_active(true)
                    .with_input(1.0)
                    .with_loop(1.0, 1.5),
            )
            .unwrap();
        render_seconds(&mut node, 2.0);

        let t = engine.input_time();
        assert!((1.0..1.5).contains(&t), "cursor {} left the loop", t);
    }

    #[test]
    fn test_invalid_loop_is_ignored() {
        let state = ScheduledState {
            loop_start: Some(2.0),
            loop_end: Some(1.0),
            ..Default::default()
        };
        assert_eq!(state.loop_region(10.0), None);

        let state = ScheduledState {
            loop_start: Some(1.0),
            ..Default::default()
        };
        assert_eq!(state.loop_region(10.0), None);
    }

    #[test]
    fn test_detached_engine_rejects_schedule() {
        let (mut engine, mut node) = stretch_pair(tone(1.0), RATE);
        engine.schedule(Schedule::new().with_active(true)).unwrap();
        engine.detach();
        engine.detach();

        assert!(matches!(
            engine.schedule(Schedule::new().with_active(true)),
            Err(EngineError::ScheduleFailure)
        ));
        let out = render_seconds(&mut node, 0.1);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_device_rate_mismatch_consumes_source_time() {
        // 8kHz source rendered at 16kHz still advances one source second per second
        let (mut engine, mut node) = stretch_pair(tone(4.0), RATE * 2);
        engine
            .schedule(Schedule::new().with_active(true).with_input(0.0))
            .unwrap();
        for _ in 0..125 {
            let mut out = StereoBuffer::silence(128);
            node.render(&mut out);
        }
        assert!((engine.input_time() - 1.0).abs() < 0.01);
    }
}
