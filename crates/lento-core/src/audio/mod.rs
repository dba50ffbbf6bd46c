//! Render backends for Lento
//!
//! The engine never steps audio itself. It hands an [`AudioRenderer`] to a
//! [`RenderBackend`], which runs it on an independent real-time path and
//! returns a [`RenderContext`] for resume/suspend/close.
//!
//! - **CpalBackend**: real output device via CPAL
//! - **OfflineBackend**: headless backend stepped manually (tests, tooling)
//!
//! # Architecture
//!
//! Control and render halves communicate the same way everywhere:
//!
//! - **Control thread**: pushes commands into a lock-free `rtrb` ringbuffer
//! - **Render thread**: owns the renderer exclusively, drains commands per block
//! - **Atomics**: control side reads the clock via relaxed atomics (no locks)

mod config;
mod cpal_backend;
mod device;
mod error;
mod offline;
mod render;

pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use cpal_backend::CpalBackend;
pub use device::{get_output_devices, OutputDevice};
pub use error::{AudioError, AudioResult};
pub use offline::OfflineBackend;
pub use render::{AudioRenderer, ContextState, RenderBackend, RenderContext};
