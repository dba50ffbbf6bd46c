//! Visual track interface

/// Change notifications raised by a visual track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualEvent {
    Play,
    Pause,
    Ended,
}

/// A track decoded and presented outside the engine
///
/// Setters are infallible: a track that cannot honour a request (detached,
/// not yet loaded) ignores it.
pub trait VisualTrack {
    /// Position in seconds
    fn current_time(&self) -> f64;

    /// Jump to `seconds`
    fn set_current_time(&mut self, seconds: f64);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    /// Length in seconds (0.0 if unknown)
    fn duration(&self) -> f64;

    fn paused(&self) -> bool;

    fn play(&mut self);

    fn pause(&mut self);

    fn muted(&self) -> bool;

    fn set_muted(&mut self, muted: bool);

    /// Volume of the track's own audio (0.0-1.0)
    fn set_volume(&mut self, volume: f32);

    /// Whether native rate changes keep the original pitch
    fn set_preserves_pitch(&mut self, preserve: bool);

    /// Take the notifications raised since the last call
    fn drain_events(&mut self) -> Vec<VisualEvent>;
}

/// Visual track whose clock only moves when told to
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct StationaryTrack {
    pub time: f64,
    pub rate: f64,
    pub duration: f64,
    pub paused: bool,
    pub muted: bool,
    pub volume: f32,
    pub preserves_pitch: bool,
    pub events: Vec<VisualEvent>,
    pub seeks: usize,
    pub rate_sets: usize,
}

#[cfg(test)]
impl StationaryTrack {
    pub fn new(duration: f64) -> Self {
        Self {
            time: 0.0,
            rate: 1.0,
            duration,
            paused: true,
            muted: false,
            volume: 1.0,
            preserves_pitch: true,
            events: Vec::new(),
            seeks: 0,
            rate_sets: 0,
        }
    }
}

#[cfg(test)]
impl VisualTrack for StationaryTrack {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.time = seconds;
        self.seeks += 1;
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.rate_sets += 1;
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn paused(&self) -> bool {
        self.paused
    }

    fn play(&mut self) {
        self.paused = false;
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn set_preserves_pitch(&mut self, preserve: bool) {
        self.preserves_pitch = preserve;
    }

    fn drain_events(&mut self) -> Vec<VisualEvent> {
        std::mem::take(&mut self.events)
    }
}
