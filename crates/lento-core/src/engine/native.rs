//! Native fallback playback
//!
//! When the render graph cannot be built, the visual track's own audio is
//! played with its native rate control and pitch preservation off. Rate and
//! pitch then collapse into a single speed factor; this is the one path where
//! they are not independent.

use crate::media::VisualTrack;
use crate::types::PlaybackParams;

/// Semitones per unit of speed change for pitch locked to speed
const SEMITONES_PER_SPEED: f64 = 12.45;

/// Single native rate equivalent to `rate` plus a `semitones` shift
#[inline]
pub fn effective_rate(rate: f64, semitones: f64) -> f64 {
    rate * 2f64.powf(semitones / 12.0)
}

/// Pitch that accompanies `rate` when pitch is locked to speed
///
/// Rounded to hundredths, e.g. 0.8x gives -2.49.
pub fn synced_semitones(rate: f64) -> f64 {
    ((rate - 1.0) * SEMITONES_PER_SPEED * 100.0).round() / 100.0
}

/// Drives a visual track as the sole audio source
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFallback;

impl NativeFallback {
    /// Hand audio over to the visual track
    pub fn engage<V: VisualTrack + ?Sized>(visual: &mut V, params: &PlaybackParams) {
        log::info!(
            "NativeFallback: engaged (effective rate {:.3})",
            effective_rate(params.rate, params.semitones)
        );
        visual.set_preserves_pitch(false);
        visual.set_muted(false);
        Self::apply_rate(visual, params);
        Self::apply_volume(visual, params.volume);
    }

    /// Push the combined rate to the visual track
    pub fn apply_rate<V: VisualTrack + ?Sized>(visual: &mut V, params: &PlaybackParams) {
        visual.set_playback_rate(effective_rate(params.rate, params.semitones));
    }

    pub fn apply_volume<V: VisualTrack + ?Sized>(visual: &mut V, volume: f32) {
        visual.set_volume(volume);
    }
}
