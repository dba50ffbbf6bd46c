//! Standard locations for Lento configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `{config_dir}/lento` (e.g. `~/.config/lento` on Linux), or
/// `./lento` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lento")
}

/// Get the default config file path for a given file name
///
/// Returns: `{config_dir}/lento/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
