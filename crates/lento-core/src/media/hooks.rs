//! Platform media integration

/// OS-level media session integration (lock screen, media keys, etc.)
pub trait PlatformMediaHooks {
    /// Playing/paused state changed
    fn set_playback_state(&mut self, playing: bool);

    /// Position, duration or rate changed
    fn set_position_state(&mut self, position: f64, duration: f64, rate: f64);

    /// Source released; drop any session state
    fn clear(&mut self);
}

/// Hooks for hosts without a media session
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMediaHooks;

impl PlatformMediaHooks for NoopMediaHooks {
    fn set_playback_state(&mut self, _playing: bool) {}

    fn set_position_state(&mut self, _position: f64, _duration: f64, _rate: f64) {}

    fn clear(&mut self) {}
}
