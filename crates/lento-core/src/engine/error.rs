//! Error types for the playback engine

use thiserror::Error;

use crate::audio::AudioError;

/// Errors raised while building or driving the render graph
#[derive(Debug, Error)]
pub enum EngineError {
    /// The render graph could not be constructed; callers fall back to native playback
    #[error("Render graph construction failed: {0}")]
    Construction(#[source] AudioError),

    /// The decoded buffer cannot be attached to a render graph
    #[error("Sample buffer rejected: {0}")]
    BufferRejected(String),

    /// A schedule arrived with no buffer attached
    #[error("Schedule ignored: no buffer attached")]
    ScheduleFailure,

    /// Operation needs a decoded source and none is loaded
    #[error("No media source loaded")]
    NoSource,

    /// Resume/suspend on an existing render context failed
    #[error("Render context error: {0}")]
    Render(#[source] AudioError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
