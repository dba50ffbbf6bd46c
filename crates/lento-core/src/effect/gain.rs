//! Click-free gain stage
//!
//! Gain changes ramp linearly across one processed block instead of jumping,
//! so parameter updates arriving mid-playback never produce zipper noise.

use super::Effect;
use crate::types::StereoBuffer;

/// Gain with a per-block linear ramp toward its target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
}

impl SmoothedGain {
    pub fn new(gain: f32) -> Self {
        Self {
            current: gain,
            target: gain,
        }
    }

    /// Ramp toward `gain` over the next processed block
    pub fn set_target(&mut self, gain: f32) {
        self.target = gain;
    }

    /// Jump to `gain` without ramping
    pub fn set_immediate(&mut self, gain: f32) {
        self.current = gain;
        self.target = gain;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Gain applied at the end of the last block
    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

impl Effect for SmoothedGain {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        let len = buffer.len();
        if len == 0 {
            return;
        }

        if self.is_settled() {
            if self.current != 1.0 {
                buffer.scale(self.current);
            }
            return;
        }

        let start = self.current;
        let step = (self.target - start) / len as f32;
        for (i, sample) in buffer.iter_mut().enumerate() {
            *sample *= start + step * (i + 1) as f32;
        }
        self.current = self.target;
    }

    fn latency_samples(&self) -> u32 {
        0
    }

    fn reset(&mut self) {
        self.current = self.target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn ones(len: usize) -> StereoBuffer {
        StereoBuffer::from_vec(vec![StereoSample::mono(1.0); len])
    }

    #[test]
    fn test_settled_gain_scales() {
        let mut gain = SmoothedGain::new(0.5);
        let mut buf = ones(8);
        gain.process(&mut buf);
        assert!(buf.iter().all(|s| s.left == 0.5));
    }

    #[test]
    fn test_ramp_reaches_target_at_block_end() {
        let mut gain = SmoothedGain::new(0.0);
        gain.set_target(1.0);
        let mut buf = ones(4);
        gain.process(&mut buf);

        assert_eq!(buf[0].left, 0.25);
        assert_eq!(buf[3].left, 1.0);
        assert!(buf.iter().zip(buf.iter().skip(1)).all(|(a, b)| a.left <= b.left));
        assert!(gain.is_settled());
    }

    #[test]
    fn test_immediate_skips_ramp() {
        let mut gain = SmoothedGain::new(1.0);
        gain.set_immediate(0.0);
        let mut buf = ones(4);
        gain.process(&mut buf);
        assert_eq!(buf.peak(), 0.0);
    }
}
