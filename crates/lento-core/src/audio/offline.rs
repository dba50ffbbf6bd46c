//! Headless render backend
//!
//! Contexts opened here are only pulled when [`OfflineBackend::render`] is
//! called, which makes the real-time path deterministic for tests and for
//! tooling that renders to memory instead of a device.

use std::sync::{Arc, Mutex, MutexGuard};

use super::config::MAX_BUFFER_SIZE;
use super::error::{AudioError, AudioResult};
use super::render::{AudioRenderer, ContextState, RenderBackend, RenderContext};
use crate::types::StereoBuffer;

/// Default block size used when stepping renderers
const DEFAULT_BLOCK_SIZE: usize = 128;

struct Slot {
    id: u64,
    state: ContextState,
    renderer: Box<dyn AudioRenderer>,
}

#[derive(Default)]
struct Shared {
    next_id: u64,
    slots: Vec<Slot>,
}

/// Manually stepped render backend
///
/// Cloning shares the same set of contexts, so a test can keep one clone to
/// drive rendering while the engine owns another.
#[derive(Clone)]
pub struct OfflineBackend {
    shared: Arc<Mutex<Shared>>,
    sample_rate: u32,
    block_size: usize,
    failure: Option<String>,
}

impl OfflineBackend {
    /// Create a backend running at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            sample_rate,
            block_size: DEFAULT_BLOCK_SIZE,
            failure: None,
        }
    }

    /// A backend whose `open` always fails, as if the render node type were
    /// unsupported on this platform
    pub fn failing(sample_rate: u32) -> Self {
        Self {
            failure: Some("offline backend configured to reject render nodes".to_string()),
            ..Self::new(sample_rate)
        }
    }

    /// Set the block size renderers are stepped with
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.clamp(1, MAX_BUFFER_SIZE);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Render `frames` frames from every running context, summed
    pub fn render(&self, frames: usize) -> StereoBuffer {
        let mut output = StereoBuffer::silence(frames);
        let mut block = StereoBuffer::silence(self.block_size);
        let mut shared = self.lock();

        let mut offset = 0;
        while offset < frames {
            let n = self.block_size.min(frames - offset);
            for slot in shared
                .slots
                .iter_mut()
                .filter(|s| s.state == ContextState::Running)
            {
                block.set_len_from_capacity(n);
                block.fill_silence();
                slot.renderer.render(&mut block);
                for (dst, src) in output.as_mut_slice()[offset..offset + n]
                    .iter_mut()
                    .zip(block.iter())
                {
                    *dst += *src;
                }
            }
            offset += n;
        }

        output
    }

    /// Render `seconds` of audio
    pub fn render_seconds(&self, seconds: f64) -> StereoBuffer {
        let frames = (seconds * self.sample_rate as f64).round().max(0.0) as usize;
        self.render(frames)
    }

    /// Number of contexts that have been opened and not closed
    pub fn open_contexts(&self) -> usize {
        self.lock().slots.len()
    }

    /// Number of contexts currently being pulled
    pub fn running_contexts(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|s| s.state == ContextState::Running)
            .count()
    }
}

impl RenderBackend for OfflineBackend {
    fn sample_rate(&self) -> AudioResult<u32> {
        Ok(self.sample_rate)
    }

    fn open(
        &self,
        sample_rate: u32,
        renderer: Box<dyn AudioRenderer>,
    ) -> AudioResult<Box<dyn RenderContext>> {
        if let Some(reason) = &self.failure {
            return Err(AudioError::Unsupported(reason.clone()));
        }
        if sample_rate != self.sample_rate {
            return Err(AudioError::ConfigError(format!(
                "offline backend runs at {}Hz, asked for {}Hz",
                self.sample_rate, sample_rate
            )));
        }

        let mut shared = self.lock();
        let id = shared.next_id;
        shared.next_id += 1;
        shared.slots.push(Slot {
            id,
            state: ContextState::Suspended,
            renderer,
        });

        Ok(Box::new(OfflineContext {
            shared: self.shared.clone(),
            id,
            sample_rate,
        }))
    }
}

struct OfflineContext {
    shared: Arc<Mutex<Shared>>,
    id: u64,
    sample_rate: u32,
}

impl OfflineContext {
    fn set_state(&mut self, state: ContextState) -> AudioResult<()> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let slot = shared
            .slots
            .iter_mut()
            .find(|s| s.id == self.id)
            .ok_or(AudioError::Closed)?;
        slot.state = state;
        Ok(())
    }
}

impl RenderContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared
            .slots
            .iter()
            .find(|s| s.id == self.id)
            .map(|s| s.state)
            .unwrap_or(ContextState::Closed)
    }

    fn resume(&mut self) -> AudioResult<()> {
        self.set_state(ContextState::Running)
    }

    fn suspend(&mut self) -> AudioResult<()> {
        self.set_state(ContextState::Suspended)
    }

    fn close(&mut self) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.slots.retain(|s| s.id != self.id);
    }
}

impl Drop for OfflineContext {
    fn drop(&mut self) {
        self.close();
    }
}
