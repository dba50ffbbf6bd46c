//! Render backend error types

use thiserror::Error;

/// Errors that can occur while opening or driving a render context
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/pause stream
    #[error("Failed to control audio stream: {0}")]
    StreamPlayError(String),

    /// Backend cannot host the requested processing unit
    #[error("Unsupported render node: {0}")]
    Unsupported(String),

    /// Context was already closed
    #[error("Render context is closed")]
    Closed,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
