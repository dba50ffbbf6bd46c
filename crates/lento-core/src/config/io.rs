//! YAML persistence for engine config and playback snapshots
//!
//! Reads never fail: a missing or unreadable file yields the type's default so
//! the player always starts. Writes go through a temporary file in the target
//! directory that is renamed over the destination, so an interrupted save
//! leaves the previous file intact.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read a YAML file into `T`, falling back to `T::default()`
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("load_config: {:?} not found, using defaults", path);
            return T::default();
        }
        Err(e) => {
            log::warn!("load_config: cannot read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    serde_yaml::from_str(&contents).unwrap_or_else(|e| {
        log::warn!("load_config: {:?} is not valid: {}, using defaults", path, e);
        T::default()
    })
}

/// Write `value` as YAML to `path`, replacing any existing file atomically
///
/// Missing parent directories are created.
pub fn save_config<T>(value: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

    let yaml = serde_yaml::to_string(value).context("Failed to serialize to YAML")?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage a file in {:?}", dir))?;
    staged
        .write_all(yaml.as_bytes())
        .and_then(|_| staged.as_file().sync_all())
        .with_context(|| format!("Failed to write staged copy of {:?}", path))?;
    staged
        .persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;

    log::debug!("save_config: wrote {:?}", path);
    Ok(())
}
