//! Render graph assembly
//!
//! An [`AudioGraph`] is the renderer handed to the backend: stretch node
//! followed by the reverb mix. [`AudioGraphHandle`] is what the player keeps
//! on the control side: the render context plus the control halves of both
//! stages.

use std::sync::Arc;

use super::error::{EngineError, EngineResult};
use super::stretch::{stretch_pair, Schedule, StretchEngine, StretchNode};
use crate::audio::{AudioError, AudioRenderer, ContextState, RenderBackend, RenderContext};
use crate::config::EngineConfig;
use crate::effect::{reverb_mix_pair, Convolver, Effect, ImpulseGenerator, ReverbMixGraph, ReverbMixNode};
use crate::types::{PlaybackParams, SampleBuffer, StereoBuffer};

/// Real-time renderer: stretch → {dry, convolver → wet} → master
pub struct AudioGraph {
    stretch: StretchNode,
    mix: ReverbMixNode,
}

impl AudioRenderer for AudioGraph {
    fn render(&mut self, output: &mut StereoBuffer) {
        self.stretch.render(output);
        self.mix.process(output);
    }
}

/// Control-side ownership of one render graph
///
/// At most one exists per player. Dropping it tears the graph down.
pub struct AudioGraphHandle {
    context: Option<Box<dyn RenderContext>>,
    stretch: StretchEngine,
    reverb: ReverbMixGraph,
    sample_rate: u32,
}

impl AudioGraphHandle {
    /// Build and open a suspended render graph for `buffer`
    ///
    /// Fails with [`EngineError::BufferRejected`] if the buffer cannot be
    /// attached, and [`EngineError::Construction`] if the backend cannot host
    /// the graph.
    pub fn build(
        backend: &dyn RenderBackend,
        buffer: Arc<SampleBuffer>,
        params: &PlaybackParams,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        buffer.validate().map_err(EngineError::BufferRejected)?;

        let sample_rate = backend.sample_rate().map_err(EngineError::Construction)?;

        let impulse = ImpulseGenerator::new(sample_rate)
            .generate(config.reverb.impulse_duration_secs, config.reverb.impulse_decay);
        let convolver = Convolver::new(&impulse, config.reverb.partition_size)
            .map_err(|e| EngineError::Construction(AudioError::ConfigError(e.to_string())))?;

        let (mut stretch, stretch_node) = stretch_pair(buffer, sample_rate);
        let (reverb, mix_node) = reverb_mix_pair(convolver, params.reverb_amount, params.volume);

        let renderer = AudioGraph {
            stretch: stretch_node,
            mix: mix_node,
        };
        let context = backend
            .open(sample_rate, Box::new(renderer))
            .map_err(EngineError::Construction)?;

        stretch.schedule(
            Schedule::new()
                .with_active(false)
                .with_rate(params.rate)
                .with_semitones(params.semitones),
        )?;

        log::info!(
            "AudioGraph: built at {}Hz (impulse {:.1}s, partition {})",
            sample_rate,
            config.reverb.impulse_duration_secs,
            config.reverb.partition_size
        );

        Ok(Self {
            context: Some(context),
            stretch,
            reverb,
            sample_rate,
        })
    }

    /// Start pulling the graph
    pub fn resume(&mut self) -> EngineResult<()> {
        match self.context.as_mut() {
            Some(context) if context.state() != ContextState::Running => {
                context.resume().map_err(EngineError::Render)
            }
            Some(_) => Ok(()),
            None => Err(EngineError::Render(AudioError::Closed)),
        }
    }

    /// Stop pulling the graph, keeping it alive
    pub fn suspend(&mut self) -> EngineResult<()> {
        match self.context.as_mut() {
            Some(context) if context.state() == ContextState::Running => {
                context.suspend().map_err(EngineError::Render)
            }
            Some(_) => Ok(()),
            None => Err(EngineError::Render(AudioError::Closed)),
        }
    }

    /// Send control updates held back by a full queue
    ///
    /// Returns true once nothing is waiting.
    pub fn flush_pending(&mut self) -> bool {
        let stretch = self.stretch.flush();
        let reverb = self.reverb.flush();
        stretch && reverb
    }

    /// Deactivate, close the context and drop the nodes. Safe to call twice.
    pub fn teardown(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        self.stretch.detach();
        context.close();
        log::debug!("AudioGraph: torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.context.is_none()
    }

    pub fn context_state(&self) -> ContextState {
        self.context
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ContextState::Closed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stretch(&self) -> &StretchEngine {
        &self.stretch
    }

    pub fn stretch_mut(&mut self) -> &mut StretchEngine {
        &mut self.stretch
    }

    pub fn reverb(&self) -> &ReverbMixGraph {
        &self.reverb
    }

    pub fn reverb_mut(&mut self) -> &mut ReverbMixGraph {
        &mut self.reverb
    }
}

impl Drop for AudioGraphHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineBackend;
    use crate::config::ReverbConfig;

    const RATE: u32 = 8000;

    fn small_config() -> EngineConfig {
        EngineConfig {
            reverb: ReverbConfig {
                impulse_duration_secs: 0.25,
                impulse_decay: 2.0,
                partition_size: 128,
            },
            ..Default::default()
        }
    }

    fn tone(seconds: f64) -> Arc<SampleBuffer> {
        let frames = (seconds * RATE as f64) as usize;
        let samples: Vec<f32> = (0..frames).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        Arc::new(SampleBuffer::new(vec![samples], RATE))
    }

    #[test]
    fn test_build_opens_suspended_context() {
        let backend = OfflineBackend::new(RATE);
        let handle =
            AudioGraphHandle::build(&backend, tone(2.0), &PlaybackParams::default(), &small_config())
                .unwrap();
        assert_eq!(backend.open_contexts(), 1);
        assert_eq!(handle.context_state(), ContextState::Suspended);
        assert_eq!(handle.sample_rate(), RATE);
    }

    #[test]
    fn test_rendering_produces_audio() {
        let backend = OfflineBackend::new(RATE);
        let mut handle =
            AudioGraphHandle::build(&backend, tone(2.0), &PlaybackParams::default(), &small_config())
                .unwrap();
        handle.resume().unwrap();
        handle
            .stretch_mut()
            .schedule(Schedule::new().with_active(true).with_input(0.0))
            .unwrap();

        let out = backend.render_seconds(0.5);
        assert!(out.peak() > 0.01);
        assert!(handle.stretch().input_time() > 0.4);
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let backend = OfflineBackend::new(RATE);
        let empty = Arc::new(SampleBuffer::new(vec![Vec::new()], RATE));
        let result =
            AudioGraphHandle::build(&backend, empty, &PlaybackParams::default(), &small_config());
        assert!(matches!(result, Err(EngineError::BufferRejected(_))));
        assert_eq!(backend.open_contexts(), 0);
    }

    #[test]
    fn test_unsupported_backend_is_construction_failure() {
        let backend = OfflineBackend::failing(RATE);
        let result =
            AudioGraphHandle::build(&backend, tone(1.0), &PlaybackParams::default(), &small_config());
        assert!(matches!(result, Err(EngineError::Construction(_))));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let backend = OfflineBackend::new(RATE);
        let mut handle =
            AudioGraphHandle::build(&backend, tone(1.0), &PlaybackParams::default(), &small_config())
                .unwrap();
        handle.teardown();
        handle.teardown();

        assert!(handle.is_torn_down());
        assert_eq!(backend.open_contexts(), 0);
        assert_eq!(handle.context_state(), ContextState::Closed);
        assert!(handle.resume().is_err());
        assert!(matches!(
            handle.stretch_mut().schedule(Schedule::new().with_active(true)),
            Err(EngineError::ScheduleFailure)
        ));
    }

    #[test]
    fn test_updates_held_while_suspended_reach_render() {
        let backend = OfflineBackend::new(RATE);
        let mut handle =
            AudioGraphHandle::build(&backend, tone(4.0), &PlaybackParams::default(), &small_config())
                .unwrap();
        for i in 0..100 {
            handle
                .stretch_mut()
                .schedule(Schedule::new().with_input(i as f64 * 0.01))
                .unwrap();
            handle.reverb_mut().set_volume(i as f32 / 100.0);
        }
        handle.reverb_mut().set_volume(0.5);
        assert!(!handle.flush_pending());

        handle.resume().unwrap();
        backend.render_seconds(0.02);
        assert!(handle.flush_pending());
        assert!(!handle.stretch().has_pending());
        assert!(!handle.reverb().has_pending());
        assert_eq!(handle.stretch().input_time(), 99.0 * 0.01);
    }

    #[test]
    fn test_drop_closes_context() {
        let backend = OfflineBackend::new(RATE);
        {
            let _handle = AudioGraphHandle::build(
                &backend,
                tone(1.0),
                &PlaybackParams::default(),
                &small_config(),
            )
            .unwrap();
            assert_eq!(backend.open_contexts(), 1);
        }
        assert_eq!(backend.open_contexts(), 0);
    }
}
