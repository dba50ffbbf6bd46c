//! Playback engine - stretch graph, native fallback, sync loop
//!
//! - Stretch: rate/pitch independent rendering with an authoritative clock
//! - Graph: stretch and reverb mix assembled into one renderer
//! - Native: fallback path driving the visual track's own rate control
//! - Sync: keeps the visual track aligned to the authoritative clock

mod error;
mod graph;
mod native;
mod stretch;
mod sync;

pub use error::*;
pub use graph::*;
pub use native::*;
pub use stretch::*;
pub use sync::*;
