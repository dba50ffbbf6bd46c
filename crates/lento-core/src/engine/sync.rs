//! Audio/visual sync loop
//!
//! One [`SyncController::tick`] per poll period (100 ms by default). In
//! stretch mode the stretch engine's input time is authoritative and the
//! visual track is pulled toward it; in fallback mode the visual track is
//! the only clock and is just read.
//!
//! Corrections are hard snaps, never rate nudges: a visual track further
//! than the drift threshold from the authoritative time is moved there.

use crate::config::SyncConfig;
use crate::media::VisualTrack;
use crate::types::PlaybackMode;

/// What the player knows at tick time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncInput {
    pub mode: PlaybackMode,
    /// Stretch engine input time (ignored in fallback mode)
    pub authoritative_time: f64,
    pub duration: f64,
    pub is_playing: bool,
    /// Host is visible / not suspended
    pub foreground: bool,
    /// Rate the visual track should run at
    pub target_rate: f64,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Clamped position to publish as `current_time`
    pub current_time: f64,
    /// Visual track position was snapped
    pub snapped: bool,
    /// A paused visual track was resumed
    pub resumed_visual: bool,
    /// Visual track rate was re-applied
    pub rate_reapplied: bool,
    /// End of track crossed on this tick
    pub ended: bool,
}

/// Drift correction and end detection state machine
#[derive(Debug, Clone)]
pub struct SyncController {
    config: SyncConfig,
    /// Set once the end fired, cleared when time falls back below the threshold
    end_latched: bool,
}

impl SyncController {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            end_latched: false,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Allow the end to fire again
    pub fn reset_end_latch(&mut self) {
        self.end_latched = false;
    }

    pub fn is_end_latched(&self) -> bool {
        self.end_latched
    }

    /// Record an end reported by the visual track itself
    pub fn latch_end(&mut self) {
        self.end_latched = true;
    }

    /// Run one sync pass
    pub fn tick<V: VisualTrack + ?Sized>(&mut self, input: &SyncInput, visual: &mut V) -> TickReport {
        let duration = input.duration.max(0.0);
        let mut report = TickReport::default();

        match input.mode {
            PlaybackMode::Stretch => {
                let authoritative = input.authoritative_time.clamp(0.0, duration);
                report.current_time = authoritative;

                if input.is_playing {
                    let drift = (authoritative - visual.current_time()).abs();
                    if drift > self.config.drift_threshold_secs {
                        log::debug!(
                            "SyncController: snapping visual track ({:.3}s drift) to {:.3}s",
                            drift,
                            authoritative
                        );
                        visual.set_current_time(authoritative);
                        report.snapped = true;
                    }

                    if input.foreground && visual.paused() {
                        log::debug!("SyncController: resuming paused visual track");
                        visual.play();
                        report.resumed_visual = true;
                    }
                }

                if (visual.playback_rate() - input.target_rate).abs() > self.config.rate_tolerance {
                    visual.set_playback_rate(input.target_rate);
                    report.rate_reapplied = true;
                }
            }
            PlaybackMode::NativeFallback => {
                report.current_time = visual.current_time().clamp(0.0, duration);
            }
        }

        report.ended = self.check_end(report.current_time, duration, input.is_playing);
        report
    }

    fn check_end(&mut self, time: f64, duration: f64, is_playing: bool) -> bool {
        if duration <= 0.0 {
            return false;
        }
        let threshold = (duration - self.config.end_margin_secs).max(0.0);
        if time < threshold {
            self.end_latched = false;
            return false;
        }
        if is_playing && !self.end_latched {
            self.end_latched = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StationaryTrack;

    fn stretch_input(a: f64, playing: bool) -> SyncInput {
        SyncInput {
            mode: PlaybackMode::Stretch,
            authoritative_time: a,
            duration: 180.0,
            is_playing: playing,
            foreground: true,
            target_rate: 1.0,
        }
    }

    fn playing_track(time: f64) -> StationaryTrack {
        let mut track = StationaryTrack::new(180.0);
        track.time = time;
        track.paused = false;
        track
    }

    #[test]
    fn test_drift_above_threshold_snaps() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = playing_track(10.0);

        let report = sync.tick(&stretch_input(10.2, true), &mut track);
        assert!(report.snapped);
        assert_eq!(track.time, 10.2);
        assert_eq!(report.current_time, 10.2);
    }

    #[test]
    fn test_drift_within_threshold_is_left_alone() {
        let mut sync = SyncController::new(SyncConfig::default());
        for &v in &[10.0, 10.05, 10.15, 9.96] {
            let mut track = playing_track(v);
            let report = sync.tick(&stretch_input(10.1, true), &mut track);
            assert!(!report.snapped, "snapped at v={}", v);
            assert_eq!(track.time, v);
            assert_eq!(track.seeks, 0);
        }
    }

    #[test]
    fn test_no_snap_while_paused() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = StationaryTrack::new(180.0);
        track.time = 3.0;
        let report = sync.tick(&stretch_input(50.0, false), &mut track);
        assert!(!report.snapped);
        assert!(!report.resumed_visual);
        assert_eq!(track.time, 3.0);
    }

    #[test]
    fn test_resumes_paused_visual_only_in_foreground() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = StationaryTrack::new(180.0);

        let mut input = stretch_input(0.0, true);
        input.foreground = false;
        assert!(!sync.tick(&input, &mut track).resumed_visual);
        assert!(track.paused);

        input.foreground = true;
        assert!(sync.tick(&input, &mut track).resumed_visual);
        assert!(!track.paused);
    }

    #[test]
    fn test_rate_reapplied_past_tolerance() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = playing_track(0.0);
        let mut input = stretch_input(0.0, true);
        input.target_rate = 0.8;

        track.rate = 0.805;
        assert!(!sync.tick(&input, &mut track).rate_reapplied);

        track.rate = 1.0;
        assert!(sync.tick(&input, &mut track).rate_reapplied);
        assert_eq!(track.rate, 0.8);
    }

    #[test]
    fn test_authoritative_time_is_clamped() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = playing_track(0.0);
        let report = sync.tick(&stretch_input(-3.0, false), &mut track);
        assert_eq!(report.current_time, 0.0);
        let report = sync.tick(&stretch_input(500.0, false), &mut track);
        assert_eq!(report.current_time, 180.0);
    }

    #[test]
    fn test_fallback_reads_visual_only() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = playing_track(42.0);
        let input = SyncInput {
            mode: PlaybackMode::NativeFallback,
            authoritative_time: 0.0,
            ..stretch_input(0.0, true)
        };
        let report = sync.tick(&input, &mut track);
        assert_eq!(report.current_time, 42.0);
        assert!(!report.snapped);
        assert_eq!(track.seeks, 0);
        assert_eq!(track.rate_sets, 0);
    }

    #[test]
    fn test_end_fires_once_per_crossing() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = playing_track(179.92);

        assert!(sync.tick(&stretch_input(179.92, true), &mut track).ended);
        assert!(!sync.tick(&stretch_input(179.95, true), &mut track).ended);
        assert!(!sync.tick(&stretch_input(180.0, true), &mut track).ended);

        // Seeking back below the threshold re-arms
        assert!(!sync.tick(&stretch_input(10.0, true), &mut track).ended);
        assert!(sync.tick(&stretch_input(179.95, true), &mut track).ended);
    }

    #[test]
    fn test_end_requires_playing() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = StationaryTrack::new(180.0);
        assert!(!sync.tick(&stretch_input(180.0, false), &mut track).ended);
        assert!(!sync.is_end_latched());
    }

    #[test]
    fn test_reset_end_latch() {
        let mut sync = SyncController::new(SyncConfig::default());
        let mut track = playing_track(180.0);
        assert!(sync.tick(&stretch_input(180.0, true), &mut track).ended);
        sync.reset_end_latch();
        assert!(sync.tick(&stretch_input(180.0, true), &mut track).ended);
    }
}
