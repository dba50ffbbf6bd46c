//! Configuration for the Lento engine and its host applications
//!
//! - Generic YAML config loading/saving
//! - Engine tuning (sync loop, decoder bound, reverb impulse)
//! - Standard config file locations
//!
//! # Usage
//!
//! ```ignore
//! use lento_core::config::{load_config, save_config, default_config_path, EngineConfig};
//!
//! let path = default_config_path("engine.yaml");
//! let config: EngineConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{DecoderConfig, EngineConfig, ReverbConfig, SyncConfig};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
