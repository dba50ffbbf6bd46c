//! Render path abstractions
//!
//! A backend runs an [`AudioRenderer`] on its own clock. The engine only ever
//! talks to the renderer through lock-free queues and atomics, so these traits
//! are the whole contract between the control thread and the real-time path.

use crate::types::StereoBuffer;

use super::error::AudioResult;

/// Real-time half of a render graph
///
/// `render` is called from the backend's audio thread with a buffer whose
/// length is the block size. Implementations must not block or allocate.
pub trait AudioRenderer: Send {
    /// Fill `output` with the next block of audio
    fn render(&mut self, output: &mut StereoBuffer);
}

/// Running state of a render context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Opened but not rendering (output is not pulled)
    Suspended,
    /// Renderer is being pulled by the backend
    Running,
    /// Torn down; no further rendering
    Closed,
}

/// Handle on an opened render context
///
/// Owned by the control thread. Dropping the context without `close()` still
/// releases the backend resources.
pub trait RenderContext {
    /// Output sample rate of this context
    fn sample_rate(&self) -> u32;

    /// Current state
    fn state(&self) -> ContextState;

    /// Start (or restart) pulling the renderer
    fn resume(&mut self) -> AudioResult<()>;

    /// Stop pulling the renderer, keeping it alive
    fn suspend(&mut self) -> AudioResult<()>;

    /// Release the context. Safe to call more than once.
    fn close(&mut self);
}

/// Factory for render contexts
pub trait RenderBackend {
    /// Sample rate that `open` will run at
    fn sample_rate(&self) -> AudioResult<u32>;

    /// Open a suspended context that will pull `renderer`
    fn open(
        &self,
        sample_rate: u32,
        renderer: Box<dyn AudioRenderer>,
    ) -> AudioResult<Box<dyn RenderContext>>;
}
