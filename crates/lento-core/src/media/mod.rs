//! Collaborators around the engine
//!
//! The engine never decodes or presents the visual track itself, never
//! touches platform media integration directly, and never decides what
//! happens at the end of a track. Each of those is an injected trait:
//!
//! - [`VisualTrack`]: position/rate/mute control over the externally
//!   decoded track (and its audio, in fallback mode)
//! - [`PlatformMediaHooks`]: OS media-session style integration
//! - [`SnapshotStore`]: persistence of the listener's playback state
//! - [`TrackEndHandler`]: pause or restart when a track ends

mod end;
mod hooks;
mod persistence;
mod varispeed;
mod visual;

pub use end::{EndAction, PauseAtEnd, RepeatTrack, TrackEndHandler};
pub use hooks::{NoopMediaHooks, PlatformMediaHooks};
pub use persistence::{PlaybackSnapshot, SnapshotStore, YamlSnapshotStore};
pub use varispeed::VarispeedTrack;
pub use visual::{VisualEvent, VisualTrack};

#[cfg(test)]
pub(crate) use visual::StationaryTrack;
