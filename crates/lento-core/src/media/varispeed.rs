//! Native-rate playback of a decoded buffer
//!
//! [`VarispeedTrack`] is a [`VisualTrack`] backed by its own render context.
//! It resamples with linear interpolation, so changing the rate changes the
//! pitch like tape varispeed. Hosts without a real visual track use it as the
//! "visual" side: muted while the stretch graph plays, audible in fallback.
//!
//! Control and render halves share atomics only; the render side never
//! blocks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::visual::{VisualEvent, VisualTrack};
use crate::audio::{AudioRenderer, AudioResult, RenderBackend, RenderContext};
use crate::types::{SampleBuffer, StereoBuffer, StereoSample};

/// Sentinel for "no pending seek"
const NO_SEEK: u64 = u64::MAX;

/// Lock-free state shared with the render thread
struct TrackAtomics {
    /// Position in seconds (f64 bits), written by the render thread
    position: AtomicU64,
    /// Seek target in seconds (f64 bits) or NO_SEEK
    pending_seek: AtomicU64,
    /// Playback rate (f64 bits)
    rate: AtomicU64,
    /// Volume (f32 bits)
    volume: AtomicU32,
    muted: AtomicBool,
    playing: AtomicBool,
    /// Set by the render thread when the end is reached
    ended: AtomicBool,
}

impl TrackAtomics {
    fn new() -> Self {
        Self {
            position: AtomicU64::new(0f64.to_bits()),
            pending_seek: AtomicU64::new(NO_SEEK),
            rate: AtomicU64::new(1f64.to_bits()),
            volume: AtomicU32::new(1f32.to_bits()),
            muted: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    #[inline]
    fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    #[inline]
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    #[inline]
    fn gain(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            0.0
        } else {
            f32::from_bits(self.volume.load(Ordering::Relaxed))
        }
    }
}

/// Render half: resamples the buffer at the current rate
struct VarispeedRenderer {
    atomics: Arc<TrackAtomics>,
    buffer: Arc<SampleBuffer>,
    /// Read head in source frames
    head: f64,
    /// Source frames per output frame at rate 1.0
    step: f64,
}

impl VarispeedRenderer {
    #[inline]
    fn read(&self, head: f64) -> StereoSample {
        let index = head.floor() as usize;
        let frac = (head - index as f64) as f32;
        let a = self.buffer.stereo_frame(index);
        let b = self.buffer.stereo_frame(index + 1);
        a * (1.0 - frac) + b * frac
    }
}

impl AudioRenderer for VarispeedRenderer {
    fn render(&mut self, output: &mut StereoBuffer) {
        let source_rate = self.buffer.sample_rate() as f64;
        let end = self.buffer.frames() as f64;

        let seek = self.atomics.pending_seek.swap(NO_SEEK, Ordering::AcqRel);
        if seek != NO_SEEK {
            self.head = (f64::from_bits(seek) * source_rate).clamp(0.0, end);
        }

        if !self.atomics.playing.load(Ordering::Relaxed) {
            output.fill_silence();
            self.atomics
                .position
                .store((self.head / source_rate).to_bits(), Ordering::Relaxed);
            return;
        }

        let increment = self.step * self.atomics.rate();
        let gain = self.atomics.gain();

        for i in 0..output.len() {
            if self.head >= end {
                output[i] = StereoSample::silence();
                continue;
            }
            output[i] = self.read(self.head) * gain;
            self.head += increment;
        }

        if self.head >= end {
            self.head = end;
            self.atomics.playing.store(false, Ordering::Relaxed);
            self.atomics.ended.store(true, Ordering::Release);
        }

        self.atomics
            .position
            .store((self.head / source_rate).to_bits(), Ordering::Relaxed);
    }
}

/// Varispeed playback of a sample buffer through a render backend
pub struct VarispeedTrack {
    atomics: Arc<TrackAtomics>,
    backend: Box<dyn RenderBackend>,
    context: Option<Box<dyn RenderContext>>,
    duration: f64,
    preserves_pitch: bool,
    events: Vec<VisualEvent>,
}

impl VarispeedTrack {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            atomics: Arc::new(TrackAtomics::new()),
            backend,
            context: None,
            duration: 0.0,
            preserves_pitch: true,
            events: Vec::new(),
        }
    }

    /// Load `buffer`, replacing any previous one
    ///
    /// The track starts paused at 0. Rate, volume and mute survive.
    pub fn attach(&mut self, buffer: Arc<SampleBuffer>) -> AudioResult<()> {
        self.detach();

        let output_rate = self.backend.sample_rate()?;
        let step = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        let duration = buffer.duration_seconds();

        self.atomics.playing.store(false, Ordering::Relaxed);
        self.atomics.ended.store(false, Ordering::Relaxed);
        self.atomics.pending_seek.store(NO_SEEK, Ordering::Relaxed);
        self.atomics.position.store(0f64.to_bits(), Ordering::Relaxed);

        let renderer = VarispeedRenderer {
            atomics: self.atomics.clone(),
            buffer,
            head: 0.0,
            step,
        };
        let mut context = self.backend.open(output_rate, Box::new(renderer))?;
        context.resume()?;

        log::debug!("VarispeedTrack: attached {:.2}s at {}Hz", duration, output_rate);
        self.context = Some(context);
        self.duration = duration;
        Ok(())
    }

    /// Release the buffer and render context
    pub fn detach(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.close();
        }
        self.atomics.playing.store(false, Ordering::Relaxed);
        self.duration = 0.0;
        self.events.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.context.is_some()
    }

    pub fn preserves_pitch(&self) -> bool {
        self.preserves_pitch
    }

    fn at_end(&self) -> bool {
        self.duration > 0.0 && self.current_time() >= self.duration
    }
}

impl VisualTrack for VarispeedTrack {
    fn current_time(&self) -> f64 {
        let seek = self.atomics.pending_seek.load(Ordering::Acquire);
        if seek != NO_SEEK {
            return f64::from_bits(seek);
        }
        self.atomics.position()
    }

    fn set_current_time(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let seconds = seconds.clamp(0.0, self.duration);
        self.atomics.ended.store(false, Ordering::Relaxed);
        self.atomics
            .pending_seek
            .store(seconds.to_bits(), Ordering::Release);
    }

    fn playback_rate(&self) -> f64 {
        self.atomics.rate()
    }

    fn set_playback_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.atomics.rate.store(rate.to_bits(), Ordering::Relaxed);
        }
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn paused(&self) -> bool {
        !self.atomics.playing.load(Ordering::Relaxed)
    }

    fn play(&mut self) {
        if self.context.is_none() || !self.paused() {
            return;
        }
        // Playing from the end restarts, as media elements do
        if self.at_end() {
            self.set_current_time(0.0);
        }
        self.atomics.playing.store(true, Ordering::Relaxed);
        self.events.push(VisualEvent::Play);
    }

    fn pause(&mut self) {
        if self.paused() {
            return;
        }
        self.atomics.playing.store(false, Ordering::Relaxed);
        self.events.push(VisualEvent::Pause);
    }

    fn muted(&self) -> bool {
        self.atomics.muted.load(Ordering::Relaxed)
    }

    fn set_muted(&mut self, muted: bool) {
        self.atomics.muted.store(muted, Ordering::Relaxed);
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.atomics.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn set_preserves_pitch(&mut self, preserve: bool) {
        if preserve {
            log::debug!("VarispeedTrack: pitch preservation unavailable, rate will shift pitch");
        }
        self.preserves_pitch = preserve;
    }

    fn drain_events(&mut self) -> Vec<VisualEvent> {
        if self.atomics.ended.swap(false, Ordering::AcqRel) {
            self.events.push(VisualEvent::Ended);
        }
        std::mem::take(&mut self.events)
    }
}

impl Drop for VarispeedTrack {
    fn drop(&mut self) {
        self.detach();
    }
}
