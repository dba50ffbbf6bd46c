//! End-of-track policy
//!
//! The engine detects the end of a track but never loops on its own; it asks
//! a [`TrackEndHandler`] what to do.

/// What the player does after a track ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndAction {
    /// Stop and reset `is_playing`
    Pause,
    /// Seek to the start and play again
    Restart,
}

/// Decides what happens when a track ends
pub trait TrackEndHandler {
    fn on_track_end(&mut self) -> EndAction;
}

/// Default policy: stop at the end
#[derive(Debug, Default, Clone, Copy)]
pub struct PauseAtEnd;

impl TrackEndHandler for PauseAtEnd {
    fn on_track_end(&mut self) -> EndAction {
        EndAction::Pause
    }
}

/// Repeat policy: restart from the top, counting passes
#[derive(Debug, Default, Clone, Copy)]
pub struct RepeatTrack {
    restarts: u32,
}

impl RepeatTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the track was restarted
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

impl TrackEndHandler for RepeatTrack {
    fn on_track_end(&mut self) -> EndAction {
        self.restarts += 1;
        EndAction::Restart
    }
}
