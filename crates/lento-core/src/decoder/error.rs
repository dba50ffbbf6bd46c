//! Error types for media retrieval and decoding

use thiserror::Error;

/// Errors that can occur while loading a media source
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Local file could not be read
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote fetch failed (connection, status code, truncated body)
    #[error("Failed to fetch '{url}': {reason}")]
    Network { url: String, reason: String },

    /// Container or codec not recognised
    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    /// Container holds no decodable audio track
    #[error("No audio track found")]
    NoAudioTrack,

    /// Decoding finished without producing a single frame
    #[error("Decoded audio is empty")]
    Empty,

    /// Retrieval plus decode exceeded the load bound
    #[error("Load did not finish within {seconds}s")]
    Timeout { seconds: u64 },

    /// Load was cancelled or superseded by a newer source
    #[error("Load cancelled")]
    Cancelled,
}

impl DecodeError {
    /// Whether this error came from the load bound expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, DecodeError::Timeout { .. })
    }
}

/// Result type for decoder operations
pub type DecodeResult<T> = Result<T, DecodeError>;
