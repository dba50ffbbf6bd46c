//! Effect processing for the render path
//!
//! Every stage in the reverb mix is an [`Effect`]: it processes a stereo
//! block in place on the render thread, reports its latency, and can be
//! reset without reallocating.

pub mod convolver;
pub mod gain;
pub mod impulse;
pub mod reverb_mix;

pub use convolver::Convolver;
pub use gain::SmoothedGain;
pub use impulse::ImpulseGenerator;
pub use reverb_mix::{reverb_gains, reverb_mix_pair, ReverbMixGraph, ReverbMixNode};

use crate::types::StereoBuffer;

/// A real-time stereo processor
pub trait Effect: Send {
    /// Process a stereo buffer in-place
    ///
    /// Called from the render thread; must not block or allocate.
    fn process(&mut self, buffer: &mut StereoBuffer);

    /// Get the latency of this effect in samples
    fn latency_samples(&self) -> u32;

    /// Clear internal state (delay lines, ramps)
    fn reset(&mut self);
}
