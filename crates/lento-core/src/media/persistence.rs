//! Playback state snapshots
//!
//! The engine hands out and accepts a minimal snapshot; where it lives is up
//! to the [`SnapshotStore`].

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{load_config, save_config};

/// Listener state worth restoring across sessions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSnapshot {
    /// Position in seconds
    pub position: f64,
    pub rate: f64,
    pub semitones: f64,
    pub reverb_amount: f32,
    pub volume: f32,
    /// Semitones follow the rate
    pub pitch_locked_to_speed: bool,
    pub is_repeat: bool,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            position: 0.0,
            rate: 1.0,
            semitones: 0.0,
            reverb_amount: 0.0,
            volume: 1.0,
            pitch_locked_to_speed: false,
            is_repeat: false,
        }
    }
}

/// Storage for playback snapshots
pub trait SnapshotStore {
    /// Last saved snapshot, if any
    fn load(&self) -> Option<PlaybackSnapshot>;

    fn save(&self, snapshot: &PlaybackSnapshot) -> Result<()>;
}

/// Snapshot stored as a YAML file
#[derive(Debug, Clone)]
pub struct YamlSnapshotStore {
    path: PathBuf,
}

impl YamlSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for YamlSnapshotStore {
    fn load(&self) -> Option<PlaybackSnapshot> {
        if !self.path.exists() {
            return None;
        }
        Some(load_config(&self.path))
    }

    fn save(&self, snapshot: &PlaybackSnapshot) -> Result<()> {
        save_config(snapshot, &self.path)
    }
}
