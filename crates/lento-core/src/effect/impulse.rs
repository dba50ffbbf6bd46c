//! Procedural reverb impulse responses
//!
//! Exponentially-shaped decaying noise, generated independently per channel
//! so the tail decorrelates between left and right.

use rand::Rng;

use crate::types::{StereoBuffer, StereoSample};

/// Builds synthetic impulse responses at a fixed sample rate
#[derive(Debug, Clone, Copy)]
pub struct ImpulseGenerator {
    sample_rate: u32,
}

impl ImpulseGenerator {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Amplitude envelope at time `t` for a tail of `duration` seconds
    ///
    /// `(1 - t/duration)^decay`, clamped to zero past the end.
    #[inline]
    pub fn envelope(t: f64, duration: f64, decay: f64) -> f32 {
        if duration <= 0.0 {
            return 0.0;
        }
        let remaining = (1.0 - t / duration).clamp(0.0, 1.0);
        remaining.powf(decay) as f32
    }

    /// Number of frames a tail of `duration_secs` occupies (at least one)
    pub fn frames_for(&self, duration_secs: f64) -> usize {
        let frames = (duration_secs.max(0.0) * self.sample_rate as f64).round() as usize;
        frames.max(1)
    }

    /// Generate an impulse using the thread RNG
    pub fn generate(&self, duration_secs: f64, decay: f64) -> StereoBuffer {
        self.generate_with_rng(duration_secs, decay, &mut rand::thread_rng())
    }

    /// Generate an impulse from the given RNG
    pub fn generate_with_rng<R: Rng + ?Sized>(
        &self,
        duration_secs: f64,
        decay: f64,
        rng: &mut R,
    ) -> StereoBuffer {
        let frames = self.frames_for(duration_secs);
        let sr = self.sample_rate.max(1) as f64;

        let samples = (0..frames)
            .map(|i| {
                let env = Self::envelope(i as f64 / sr, duration_secs, decay);
                let left = rng.gen_range(-1.0f32..=1.0) * env;
                let right = rng.gen_range(-1.0f32..=1.0) * env;
                StereoSample::new(left, right)
            })
            .collect();

        StereoBuffer::from_vec(samples)
    }
}
