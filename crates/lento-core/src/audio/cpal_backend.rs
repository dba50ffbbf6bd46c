//! CPAL audio backend implementation
//!
//! Opens one output stream per render context on the configured device.
//!
//! ```text
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │  Control Thread  │───push()───────────►│   Command Queues    │
//! │  (100ms ticks)   │                     │  (lock-free SPSC)   │
//! └──────────────────┘                     └──────────┬──────────┘
//!         ▲                                           │ pop()
//!         │ Relaxed atomics                           ▼
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │   Clock atomics  │◄────────────────────│  CPAL Audio Thread  │
//! │   (lock-free)    │    per-block writes │  (owns renderer)    │
//! └──────────────────┘                     └─────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::config::{AudioConfig, BufferSize, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
use super::device::{find_device_by_id, get_cpal_default_device};
use super::error::{AudioError, AudioResult};
use super::render::{AudioRenderer, ContextState, RenderBackend, RenderContext};
use crate::types::{StereoBuffer, SAMPLE_RATE};

/// Render backend driving a CPAL output device
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    config: AudioConfig,
}

impl CpalBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    fn device(&self) -> AudioResult<cpal::Device> {
        match &self.config.device {
            Some(id) => find_device_by_id(id),
            None => get_cpal_default_device(),
        }
    }
}

impl RenderBackend for CpalBackend {
    fn sample_rate(&self) -> AudioResult<u32> {
        let device = self.device()?;
        let (supported, _) = get_output_config(&device, &self.config)?;
        Ok(supported.sample_rate().0)
    }

    fn open(
        &self,
        sample_rate: u32,
        renderer: Box<dyn AudioRenderer>,
    ) -> AudioResult<Box<dyn RenderContext>> {
        let device = self.device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (supported, buffer_size) = get_output_config(&device, &self.config)?;
        if supported.sample_rate().0 != sample_rate {
            return Err(AudioError::ConfigError(format!(
                "Device {} no longer runs at {}Hz",
                device_name, sample_rate
            )));
        }

        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: match buffer_size {
                Some(frames) => CpalBufferSize::Fixed(frames),
                None => CpalBufferSize::Default,
            },
        };

        log::info!(
            "CpalBackend: Opening {} ({} channels, {}Hz, {:?} frames)",
            device_name,
            stream_config.channels,
            sample_rate,
            buffer_size
        );

        let running = Arc::new(AtomicBool::new(false));
        let stream = build_output_stream(&device, &stream_config, renderer, running.clone())?;

        // Some hosts start streams on build; hold it until resume()
        if let Err(e) = stream.pause() {
            log::debug!("CpalBackend: Initial pause not supported: {}", e);
        }

        Ok(Box::new(CpalContext {
            stream: Some(stream),
            running,
            sample_rate,
        }))
    }
}

/// An opened CPAL output stream
struct CpalContext {
    stream: Option<Stream>,
    /// Gate checked by the callback; silence while false
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

impl RenderContext for CpalContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        match self.stream {
            None => ContextState::Closed,
            Some(_) if self.running.load(Ordering::Relaxed) => ContextState::Running,
            Some(_) => ContextState::Suspended,
        }
    }

    fn resume(&mut self) -> AudioResult<()> {
        let stream = self.stream.as_ref().ok_or(AudioError::Closed)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn suspend(&mut self) -> AudioResult<()> {
        let stream = self.stream.as_ref().ok_or(AudioError::Closed)?;
        self.running.store(false, Ordering::Relaxed);
        stream
            .pause()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            log::debug!("CpalBackend: Stream closed");
        }
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Get the best output configuration for a device
///
/// Returns (SupportedStreamConfig, requested buffer size in frames)
fn get_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, Option<u32>)> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    if supported_configs.is_empty() {
        return Err(AudioError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    let target_sample_rate = config.sample_rate.unwrap_or(SAMPLE_RATE);

    let best_config = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| {
            target_sample_rate >= c.min_sample_rate().0
                && target_sample_rate <= c.max_sample_rate().0
        })
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32)
        })
        .ok_or_else(|| {
            AudioError::ConfigError("No f32 output configuration found".to_string())
        })?;

    let sample_rate = if target_sample_rate >= best_config.min_sample_rate().0
        && target_sample_rate <= best_config.max_sample_rate().0
    {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = match config.buffer_size {
        BufferSize::Default => Some(DEFAULT_BUFFER_SIZE),
        BufferSize::Fixed(frames) => Some(frames.clamp(64, MAX_BUFFER_SIZE as u32)),
    };

    Ok((best_config.clone().with_sample_rate(sample_rate), buffer_size))
}

/// Build the output stream that pulls `renderer`
fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut renderer: Box<dyn AudioRenderer>,
    running: Arc<AtomicBool>,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;
    let mut block = StereoBuffer::silence(MAX_BUFFER_SIZE);

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                // Hosts may hand us more than MAX_BUFFER_SIZE frames at once
                for chunk in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
                    let n_frames = chunk.len() / channels;
                    block.set_len_from_capacity(n_frames);
                    renderer.render(&mut block);

                    for (frame, sample) in chunk.chunks_mut(channels).zip(block.iter()) {
                        frame[0] = sample.left;
                        if channels > 1 {
                            frame[1] = sample.right;
                        }
                        for ch in frame.iter_mut().skip(2) {
                            *ch = 0.0;
                        }
                    }
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}
