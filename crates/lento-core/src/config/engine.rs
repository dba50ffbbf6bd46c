//! Engine tuning configuration
//!
//! The sync thresholds and poll period were chosen empirically; they are kept
//! as configurable defaults rather than hard-coded values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sync loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the sync tick in milliseconds
    /// Default: 100
    pub poll_interval_ms: u64,

    /// Visual/audio divergence that triggers a hard position snap (seconds)
    /// Default: 0.15
    pub drift_threshold_secs: f64,

    /// Rate divergence on the visual track that triggers a re-apply
    /// Default: 0.01
    pub rate_tolerance: f64,

    /// Distance from the end at which the track counts as finished (seconds)
    /// Default: 0.1
    pub end_margin_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            drift_threshold_secs: 0.15,
            rate_tolerance: 0.01,
            end_margin_secs: 0.1,
        }
    }
}

impl SyncConfig {
    /// Poll period as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Media decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Upper bound on retrieval + decode for one load (seconds)
    /// Default: 30
    pub load_timeout_secs: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            load_timeout_secs: 30,
        }
    }
}

impl DecoderConfig {
    /// Load bound as a Duration
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

/// Procedural reverb configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    /// Impulse response length in seconds
    /// Default: 3.0
    pub impulse_duration_secs: f64,

    /// Exponent of the impulse decay envelope
    /// Default: 2.0
    pub impulse_decay: f64,

    /// Convolution partition size in frames (rounded up to a power of two)
    /// Default: 512
    pub partition_size: usize,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            impulse_duration_secs: 3.0,
            impulse_decay: 2.0,
            partition_size: 512,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub decoder: DecoderConfig,
    pub reverb: ReverbConfig,
}
