//! Lento Core - Speed, pitch and reverb playback engine with audio/visual sync

pub mod audio;
pub mod config;
pub mod types;
pub mod decoder;
pub mod effect;
pub mod timestretch;
pub mod engine;
pub mod media;
pub mod player;

pub use types::*;
