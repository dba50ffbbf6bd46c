//! Playback facade
//!
//! [`Player`] is the public surface: load a source, then play, pause, seek
//! and adjust rate, pitch, reverb and volume. It owns the render graph (or
//! the native fallback), runs the sync loop from [`Player::tick`], and
//! publishes [`PlaybackEvent`]s to subscribers.
//!
//! # Lifecycle
//!
//! ```text
//! load() ──► Loading ──decode ok──► Ready ──warm_up()/play()──► Stretch | NativeFallback
//!               └──decode failed──► Error (until the next load)
//! ```
//!
//! The playback path is chosen once per source, on the first `warm_up()` or
//! `play()`, and never re-evaluated until the source changes.
//!
//! # Threading
//!
//! Everything here runs on one control thread. The render path runs on the
//! backend's own thread and is reached only through the stretch engine's
//! queue and clock.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::audio::RenderBackend;
use crate::config::EngineConfig;
use crate::decoder::{DecodeError, DecodeResult, MediaDecoder, PendingLoad};
use crate::engine::{
    synced_semitones, AudioGraphHandle, EngineError, EngineResult, NativeFallback, Schedule,
    SyncController, SyncInput, TickReport,
};
use crate::media::{
    EndAction, NoopMediaHooks, PauseAtEnd, PlatformMediaHooks, PlaybackSnapshot, RepeatTrack,
    TrackEndHandler, VisualEvent, VisualTrack,
};
use crate::types::{
    EngineState, MediaSource, PlaybackMode, PlaybackParams, SampleBuffer, TransportState,
};

/// Per-subscriber event queue depth
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Notifications published by the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(EngineState),
    PlayingChanged(bool),
    TimeUpdate { current_time: f64, duration: f64 },
    ModeSelected(PlaybackMode),
    TrackEnded,
    LoadFailed(String),
}

/// Speed, pitch and reverb playback of one source at a time
pub struct Player<V: VisualTrack> {
    config: EngineConfig,
    backend: Box<dyn RenderBackend>,
    visual: V,
    hooks: Box<dyn PlatformMediaHooks>,
    end_handler: Box<dyn TrackEndHandler>,
    decoder: MediaDecoder,

    state: EngineState,
    source: Option<MediaSource>,
    pending: Option<PendingLoad>,

    params: PlaybackParams,
    pitch_locked: bool,
    repeat: bool,

    /// Chosen once per source
    mode: Option<PlaybackMode>,
    graph: Option<AudioGraphHandle>,
    /// Set while a graph is being constructed
    building_graph: bool,

    sync: SyncController,
    is_playing: bool,
    /// Position before a path exists (and last published position)
    current_time: f64,
    /// Seek requested before the source finished loading
    pending_position: Option<f64>,
    foreground: bool,

    subscribers: Vec<Sender<PlaybackEvent>>,
}

impl<V: VisualTrack> Player<V> {
    pub fn new(
        visual: V,
        backend: Box<dyn RenderBackend>,
        hooks: Box<dyn PlatformMediaHooks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            decoder: MediaDecoder::new(config.decoder.clone()),
            sync: SyncController::new(config.sync.clone()),
            config,
            backend,
            visual,
            hooks,
            end_handler: Box::new(PauseAtEnd),
            state: EngineState::Loading,
            source: None,
            pending: None,
            params: PlaybackParams::default(),
            pitch_locked: false,
            repeat: false,
            mode: None,
            graph: None,
            building_graph: false,
            is_playing: false,
            current_time: 0.0,
            pending_position: None,
            foreground: true,
            subscribers: Vec::new(),
        }
    }

    /// Player with no platform media integration
    pub fn with_defaults(visual: V, backend: Box<dyn RenderBackend>, config: EngineConfig) -> Self {
        Self::new(visual, backend, Box::new(NoopMediaHooks), config)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Loading
    // ────────────────────────────────────────────────────────────────────────

    /// Start loading `url` in the background
    ///
    /// Tears down the current source and cancels any load in flight. The
    /// result is picked up by [`tick`](Self::tick) or
    /// [`wait_until_loaded`](Self::wait_until_loaded).
    pub fn load(&mut self, url: &str) {
        self.release_source();
        log::info!("Player: loading {}", url);
        self.set_state(EngineState::Loading);
        self.pending = Some(PendingLoad::spawn(self.decoder.clone(), url));
    }

    /// Use an already decoded buffer as the source
    pub fn load_decoded(&mut self, url: &str, buffer: SampleBuffer) -> EngineState {
        self.release_source();
        self.set_state(EngineState::Loading);
        self.settle_load(url.to_string(), Ok(buffer));
        self.state
    }

    /// Block until the pending load settles or `timeout` passes
    pub fn wait_until_loaded(&mut self, timeout: Duration) -> EngineState {
        let Some(pending) = self.pending.as_mut() else {
            return self.state;
        };
        if let Some(result) = pending.wait(timeout) {
            let url = pending.url().to_string();
            self.pending = None;
            self.settle_load(url, result);
        }
        self.state
    }

    /// Whether a background load is still in flight
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    fn poll_load(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if let Some(result) = pending.poll() {
            let url = pending.url().to_string();
            self.pending = None;
            self.settle_load(url, result);
        }
    }

    fn settle_load(&mut self, url: String, result: DecodeResult<SampleBuffer>) {
        let buffer = match result {
            Ok(buffer) => buffer,
            Err(e) => {
                self.fail_load(&url, &e);
                return;
            }
        };

        if let Err(reason) = buffer.validate() {
            log::error!("Player: decoded buffer for {} rejected: {}", url, reason);
            self.set_state(EngineState::Error);
            self.publish(PlaybackEvent::LoadFailed(reason));
            return;
        }

        let source = MediaSource::new(url, Arc::new(buffer));
        let duration = source.duration();
        log::info!("Player: {} ready ({:.2}s)", source.url, duration);

        self.source = Some(source);
        self.current_time = self
            .pending_position
            .take()
            .map(|t| t.clamp(0.0, duration))
            .unwrap_or(0.0);
        self.sync.reset_end_latch();
        self.set_state(EngineState::Ready);
        self.publish_time();
    }

    fn fail_load(&mut self, url: &str, error: &DecodeError) {
        if error.is_timeout() {
            log::error!("Player: loading {} timed out: {}", url, error);
        } else {
            log::error!("Player: failed to load {}: {}", url, error);
        }
        self.set_state(EngineState::Error);
        self.publish(PlaybackEvent::LoadFailed(error.to_string()));
    }

    /// Drop the source, the graph and any load in flight
    fn release_source(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            pending.cancel();
        }
        if let Some(mut graph) = self.graph.take() {
            graph.teardown();
        }
        if self.source.is_some() || self.mode.is_some() {
            self.visual.pause();
            self.hooks.clear();
        }
        self.building_graph = false;
        self.mode = None;
        self.source = None;
        self.current_time = 0.0;
        self.sync.reset_end_latch();
        self.set_playing(false);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Path selection
    // ────────────────────────────────────────────────────────────────────────

    /// Choose and construct the playback path for the current source
    ///
    /// Builds the render graph; if the backend cannot host it, engages the
    /// native fallback instead. Calling again returns the mode already chosen.
    pub fn warm_up(&mut self) -> EngineResult<PlaybackMode> {
        if let Some(mode) = self.mode {
            return Ok(mode);
        }
        if self.state != EngineState::Ready {
            return Err(EngineError::NoSource);
        }
        let Some(buffer) = self.source.as_ref().map(|s| s.buffer.clone()) else {
            return Err(EngineError::NoSource);
        };
        if self.building_graph || self.graph.is_some() {
            log::warn!("Player: render graph already exists, refusing to build another");
            return Err(EngineError::Construction(crate::audio::AudioError::Unsupported(
                "render graph already exists".to_string(),
            )));
        }

        self.building_graph = true;
        let built = AudioGraphHandle::build(self.backend.as_ref(), buffer, &self.params, &self.config);
        self.building_graph = false;

        let mode = match built {
            Ok(mut graph) => {
                if let Err(e) = graph
                    .stretch_mut()
                    .schedule(Schedule::new().with_input(self.current_time))
                {
                    log::warn!("Player: initial schedule ignored: {}", e);
                }
                self.graph = Some(graph);

                // Visual-only from here on; audio comes from the graph
                self.visual.set_muted(true);
                self.visual.set_playback_rate(self.params.rate);
                self.visual.set_current_time(self.current_time);
                PlaybackMode::Stretch
            }
            Err(EngineError::Construction(e)) => {
                log::warn!("Player: render graph unavailable ({}), using native fallback", e);
                NativeFallback::engage(&mut self.visual, &self.params);
                self.visual.set_current_time(self.current_time);
                PlaybackMode::NativeFallback
            }
            Err(e) => {
                log::error!("Player: render graph setup failed: {}", e);
                self.set_state(EngineState::Error);
                return Err(e);
            }
        };

        log::info!("Player: playback path {:?}", mode);
        self.mode = Some(mode);
        self.publish(PlaybackEvent::ModeSelected(mode));
        Ok(mode)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transport
    // ────────────────────────────────────────────────────────────────────────

    pub fn play(&mut self) {
        if self.state != EngineState::Ready {
            log::debug!("Player: play ignored in state {:?}", self.state);
            return;
        }
        let mode = match self.warm_up() {
            Ok(mode) => mode,
            Err(e) => {
                log::warn!("Player: cannot play: {}", e);
                return;
            }
        };

        // Playing from the end starts over
        if self.current_time() >= self.end_threshold() {
            self.seek(0.0);
        }

        match mode {
            PlaybackMode::Stretch => {
                if let Some(graph) = self.graph.as_mut() {
                    if let Err(e) = graph.resume() {
                        log::error!("Player: failed to resume render context: {}", e);
                    }
                }
                let params = self.params;
                self.schedule(
                    Schedule::new()
                        .with_active(true)
                        .with_rate(params.rate)
                        .with_semitones(params.semitones),
                );
                self.visual.set_muted(true);
                self.visual.set_playback_rate(params.rate);
                self.visual.play();
            }
            PlaybackMode::NativeFallback => self.visual.play(),
        }

        self.set_playing(true);
    }

    pub fn pause(&mut self) {
        match self.mode {
            Some(PlaybackMode::Stretch) => {
                self.schedule(Schedule::new().with_active(false));
                if let Some(graph) = self.graph.as_mut() {
                    if let Err(e) = graph.suspend() {
                        log::warn!("Player: failed to suspend render context: {}", e);
                    }
                }
                self.visual.pause();
            }
            Some(PlaybackMode::NativeFallback) => self.visual.pause(),
            None => {}
        }
        self.set_playing(false);
    }

    pub fn toggle_playback(&mut self) {
        if self.is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to `seconds`, clamped to the source duration
    pub fn seek(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            log::warn!("Player: ignoring seek to {}", seconds);
            return;
        }
        if self.source.is_none() {
            self.pending_position = Some(seconds.max(0.0));
            return;
        }

        let t = seconds.clamp(0.0, self.duration());
        if self.mode == Some(PlaybackMode::Stretch) {
            let active = self.is_playing;
            self.schedule(Schedule::new().with_input(t).with_active(active));
        }
        self.visual.set_current_time(t);
        self.current_time = t;

        if t < self.end_threshold() {
            self.sync.reset_end_latch();
        }
        self.publish_time();
    }

    // ────────────────────────────────────────────────────────────────────────
    // Parameters
    // ────────────────────────────────────────────────────────────────────────

    pub fn set_rate(&mut self, rate: f64) {
        if !self.params.set_rate(rate) {
            log::warn!("Player: ignoring invalid rate {}", rate);
            return;
        }
        if self.pitch_locked {
            self.params.semitones = synced_semitones(self.params.rate);
        }
        self.apply_rate();
    }

    pub fn set_semitones(&mut self, semitones: f64) {
        if !self.params.set_semitones(semitones) {
            log::warn!("Player: ignoring invalid pitch {}", semitones);
            return;
        }
        self.apply_rate();
    }

    /// Set reverb wetness; a no-op in fallback mode
    pub fn set_reverb_amount(&mut self, amount: f32) {
        if self.mode == Some(PlaybackMode::NativeFallback) {
            log::debug!("Player: reverb unavailable in fallback mode");
            return;
        }
        self.params.set_reverb_amount(amount);
        if let Some(graph) = self.graph.as_mut() {
            graph.reverb_mut().set_amount(self.params.reverb_amount);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.params.set_volume(volume);
        match self.mode {
            Some(PlaybackMode::Stretch) => {
                if let Some(graph) = self.graph.as_mut() {
                    graph.reverb_mut().set_volume(self.params.volume);
                }
            }
            Some(PlaybackMode::NativeFallback) => {
                NativeFallback::apply_volume(&mut self.visual, self.params.volume)
            }
            None => {}
        }
    }

    /// Lock pitch to speed: semitones follow [`synced_semitones`] of the rate
    pub fn set_pitch_locked(&mut self, locked: bool) {
        self.pitch_locked = locked;
        if locked {
            self.params.semitones = synced_semitones(self.params.rate);
            self.apply_rate();
        }
    }

    /// Restart at the end instead of pausing
    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
        self.end_handler = if repeat {
            Box::new(RepeatTrack::new())
        } else {
            Box::new(PauseAtEnd)
        };
    }

    /// Install a custom end-of-track policy
    pub fn set_end_handler(&mut self, handler: Box<dyn TrackEndHandler>) {
        self.end_handler = handler;
    }

    fn apply_rate(&mut self) {
        let params = self.params;
        match self.mode {
            Some(PlaybackMode::Stretch) => {
                self.schedule(
                    Schedule::new()
                        .with_rate(params.rate)
                        .with_semitones(params.semitones),
                );
                self.visual.set_playback_rate(params.rate);
            }
            Some(PlaybackMode::NativeFallback) => NativeFallback::apply_rate(&mut self.visual, &params),
            None => {}
        }
    }

    fn schedule(&mut self, schedule: Schedule) {
        match self.graph.as_mut() {
            Some(graph) => {
                if let Err(e) = graph.stretch_mut().schedule(schedule) {
                    log::warn!("Player: {}", e);
                }
            }
            None => log::debug!("Player: no render graph, schedule ignored"),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Sync loop and host events
    // ────────────────────────────────────────────────────────────────────────

    /// Run one sync pass; call every `config.sync.poll_interval()`
    ///
    /// Also settles a finished background load and handles visual track
    /// notifications.
    pub fn tick(&mut self) -> Option<TickReport> {
        self.poll_load();
        self.handle_visual_events();

        if self.state != EngineState::Ready {
            return None;
        }
        let mode = self.mode?;

        if let Some(graph) = self.graph.as_mut() {
            graph.flush_pending();
        }

        let input = SyncInput {
            mode,
            authoritative_time: self
                .graph
                .as_ref()
                .map(|g| g.stretch().input_time())
                .unwrap_or(self.current_time),
            duration: self.duration(),
            is_playing: self.is_playing,
            foreground: self.foreground,
            target_rate: self.params.rate,
        };

        let report = self.sync.tick(&input, &mut self.visual);
        self.current_time = report.current_time;
        self.publish_time();

        if report.ended {
            self.on_track_end();
        }
        Some(report)
    }

    /// Host visibility changed (window shown/hidden, device resumed)
    ///
    /// On restore, runs a resync pass immediately and brings the visual
    /// track's play state back in line with the player's.
    pub fn on_visibility_change(&mut self, visible: bool) {
        // Events queued so far belong to the previous visibility state
        self.handle_visual_events();
        self.foreground = visible;
        if !visible {
            return;
        }
        log::debug!("Player: foregrounded, resyncing");
        self.tick();

        if self.mode.is_some() && self.visual.paused() == self.is_playing {
            if self.is_playing {
                self.play();
            } else {
                self.pause();
            }
        }
    }

    fn handle_visual_events(&mut self) {
        let events = self.visual.drain_events();
        if self.mode != Some(PlaybackMode::NativeFallback) {
            return;
        }
        for event in events {
            match event {
                // Only user-initiated changes count; background pauses are
                // reverted on the next visibility restore
                VisualEvent::Play if self.foreground => self.set_playing(true),
                VisualEvent::Pause if self.foreground => self.set_playing(false),
                VisualEvent::Ended if self.is_playing && !self.sync.is_end_latched() => {
                    self.sync.latch_end();
                    self.on_track_end();
                }
                _ => {}
            }
        }
    }

    fn on_track_end(&mut self) {
        log::info!("Player: track ended");
        self.publish(PlaybackEvent::TrackEnded);
        match self.end_handler.on_track_end() {
            EndAction::Pause => self.pause(),
            EndAction::Restart => {
                self.seek(0.0);
                self.play();
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Persistence
    // ────────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            position: self.current_time(),
            rate: self.params.rate,
            semitones: self.params.semitones,
            reverb_amount: self.params.reverb_amount,
            volume: self.params.volume,
            pitch_locked_to_speed: self.pitch_locked,
            is_repeat: self.repeat,
        }
    }

    /// Apply a saved snapshot; the position is deferred until a source loads
    pub fn restore(&mut self, snapshot: &PlaybackSnapshot) {
        self.set_rate(snapshot.rate);
        self.set_semitones(snapshot.semitones);
        self.set_pitch_locked(snapshot.pitch_locked_to_speed);
        self.set_reverb_amount(snapshot.reverb_amount);
        self.set_volume(snapshot.volume);
        self.set_repeat(snapshot.is_repeat);
        self.seek(snapshot.position);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Teardown
    // ────────────────────────────────────────────────────────────────────────

    /// Release the graph, the source and any load in flight. Idempotent.
    pub fn cleanup(&mut self) {
        self.release_source();
        self.pending_position = None;
        self.set_state(EngineState::Loading);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Observables
    // ────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Position in the source timeline, clamped to `[0, duration]`
    pub fn current_time(&self) -> f64 {
        let duration = self.duration();
        let time = match (self.mode, self.graph.as_ref()) {
            (Some(PlaybackMode::Stretch), Some(graph)) => graph.stretch().input_time(),
            (Some(PlaybackMode::NativeFallback), _) => self.visual.current_time(),
            _ => self.current_time,
        };
        time.clamp(0.0, duration)
    }

    pub fn duration(&self) -> f64 {
        self.source.as_ref().map(|s| s.duration()).unwrap_or(0.0)
    }

    pub fn is_native_fallback(&self) -> bool {
        self.mode == Some(PlaybackMode::NativeFallback)
    }

    pub fn mode(&self) -> Option<PlaybackMode> {
        self.mode
    }

    pub fn transport(&self) -> TransportState {
        TransportState {
            is_playing: self.is_playing,
            current_time: self.current_time(),
            duration: self.duration(),
            mode: self.mode,
        }
    }

    pub fn params(&self) -> &PlaybackParams {
        &self.params
    }

    pub fn is_pitch_locked(&self) -> bool {
        self.pitch_locked
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decoded buffer of the current source
    pub fn source_buffer(&self) -> Option<Arc<SampleBuffer>> {
        self.source.as_ref().map(|s| s.buffer.clone())
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.url.as_str())
    }

    pub fn visual(&self) -> &V {
        &self.visual
    }

    pub fn visual_mut(&mut self) -> &mut V {
        &mut self.visual
    }

    /// Receive every event published from now on
    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = channel::bounded(EVENT_QUEUE_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    // ────────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────────

    fn end_threshold(&self) -> f64 {
        (self.duration() - self.config.sync.end_margin_secs).max(0.0)
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            self.state = state;
            self.publish(PlaybackEvent::StateChanged(state));
        }
    }

    fn set_playing(&mut self, playing: bool) {
        if self.is_playing != playing {
            self.is_playing = playing;
            self.hooks.set_playback_state(playing);
            self.publish(PlaybackEvent::PlayingChanged(playing));
        }
    }

    fn publish_time(&mut self) {
        let current_time = self.current_time();
        let duration = self.duration();
        let rate = match self.mode {
            Some(PlaybackMode::NativeFallback) => self.visual.playback_rate(),
            _ => self.params.rate,
        };
        self.hooks.set_position_state(current_time, duration, rate);
        self.publish(PlaybackEvent::TimeUpdate {
            current_time,
            duration,
        });
    }

    fn publish(&mut self, event: PlaybackEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl<V: VisualTrack> Drop for Player<V> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineBackend;
    use crate::config::ReverbConfig;
    use crate::media::{StationaryTrack, VarispeedTrack};
    use std::cell::RefCell;
    use std::rc::Rc;

    const RATE: u32 = 8000;

    fn config() -> EngineConfig {
        EngineConfig {
            reverb: ReverbConfig {
                impulse_duration_secs: 0.5,
                impulse_decay: 2.0,
                partition_size: 256,
            },
            ..Default::default()
        }
    }

    fn tone(seconds: f64) -> SampleBuffer {
        let frames = (seconds * RATE as f64) as usize;
        let samples: Vec<f32> = (0..frames).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        SampleBuffer::new(vec![samples.clone(), samples], RATE)
    }

    fn player(backend: &OfflineBackend, seconds: f64) -> Player<StationaryTrack> {
        let mut player = Player::with_defaults(
            StationaryTrack::new(seconds),
            Box::new(backend.clone()),
            config(),
        );
        player.load_decoded("memory://tone", tone(seconds));
        player
    }

    #[derive(Default)]
    struct HookLog {
        playing: Vec<bool>,
        positions: usize,
        clears: usize,
    }

    struct RecordingHooks(Rc<RefCell<HookLog>>);

    impl PlatformMediaHooks for RecordingHooks {
        fn set_playback_state(&mut self, playing: bool) {
            self.0.borrow_mut().playing.push(playing);
        }

        fn set_position_state(&mut self, _position: f64, _duration: f64, _rate: f64) {
            self.0.borrow_mut().positions += 1;
        }

        fn clear(&mut self) {
            self.0.borrow_mut().clears += 1;
        }
    }

    #[test]
    fn test_load_decoded_becomes_ready() {
        let backend = OfflineBackend::new(RATE);
        let player = player(&backend, 2.0);
        assert_eq!(player.state(), EngineState::Ready);
        assert_eq!(player.duration(), 2.0);
        assert_eq!(player.mode(), None);
        assert_eq!(backend.open_contexts(), 0);
    }

    #[test]
    fn test_invalid_buffer_is_error() {
        let backend = OfflineBackend::new(RATE);
        let mut player =
            Player::with_defaults(StationaryTrack::new(0.0), Box::new(backend), config());
        let state = player.load_decoded("memory://empty", SampleBuffer::new(vec![], RATE));
        assert_eq!(state, EngineState::Error);

        player.play();
        assert!(!player.is_playing());
    }

    #[test]
    fn test_setters_buffer_before_playback() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 4.0);
        player.set_rate(0.8);
        player.set_semitones(-2.49);
        player.set_reverb_amount(0.6);
        player.set_volume(0.5);
        player.seek(1.5);

        assert_eq!(backend.open_contexts(), 0);
        player.play();

        assert_eq!(player.mode(), Some(PlaybackMode::Stretch));
        let graph = player.graph.as_ref().unwrap();
        assert_eq!(graph.stretch().state().rate, 0.8);
        assert_eq!(graph.stretch().state().semitones, -2.49);
        assert_eq!(graph.reverb().amount(), 0.6);
        assert_eq!(graph.reverb().volume(), 0.5);
        assert_eq!(player.current_time(), 1.5);
        assert!(player.visual().muted);
        assert_eq!(player.visual().rate, 0.8);
    }

    #[test]
    fn test_seek_precision_in_stretch_mode() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 10.0);
        player.play();

        for &rate in &[0.5, 0.75, 1.0, 1.25, 1.5] {
            player.set_rate(rate);
            for &t in &[0.0, 0.3333, 2.5, 7.125, 9.9] {
                player.seek(t);
                assert_eq!(player.current_time(), t);
            }
        }
    }

    #[test]
    fn test_slowed_scenario_advances_at_rate() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 180.0);
        player.play();
        player.set_rate(0.8);
        player.set_semitones(-2.49);

        backend.render_seconds(1.0);
        player.tick();

        let t = player.current_time();
        assert!((t - 0.8).abs() < 0.02, "expected ~0.8s after 1s, got {}", t);
        assert!(!player.is_native_fallback());
        assert!(player.is_playing());

        backend.render_seconds(1.0);
        let t2 = player.current_time();
        assert!((t2 - t - 0.8).abs() < 0.02);
    }

    #[test]
    fn test_seeks_while_paused_survive_full_queue() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 10.0);
        player.play();
        player.pause();

        for i in 0..100 {
            player.seek(i as f64 * 0.05);
        }
        player.set_rate(0.5);
        player.play();
        assert_eq!(player.current_time(), 99.0 * 0.05);

        backend.render_seconds(0.02);
        player.tick();
        assert_eq!(player.current_time(), 99.0 * 0.05);

        backend.render_seconds(1.0);
        let t = player.current_time();
        assert!((t - 5.45).abs() < 0.02, "expected ~5.45s, got {}", t);
    }

    #[test]
    fn test_construction_failure_falls_back() {
        let audible = OfflineBackend::new(RATE);
        let mut visual = VarispeedTrack::new(Box::new(audible.clone()));
        visual.attach(Arc::new(tone(4.0))).unwrap();

        let mut player = Player::with_defaults(
            visual,
            Box::new(OfflineBackend::failing(RATE)),
            config(),
        );
        player.load_decoded("memory://tone", tone(4.0));
        player.set_semitones(12.0);
        player.play();

        assert!(player.is_native_fallback());
        assert!(player.is_playing());
        assert!(!player.visual().muted());
        assert!(!player.visual().preserves_pitch());
        assert_eq!(player.visual().playback_rate(), 2.0);

        // Audible through the visual track
        assert!(audible.render_seconds(0.25).peak() > 0.1);
        assert!((player.current_time() - 0.5).abs() < 0.01);

        let before = *player.params();
        player.set_reverb_amount(0.9);
        assert_eq!(*player.params(), before);
    }

    #[test]
    fn test_mode_chosen_once() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 2.0);
        assert_eq!(player.warm_up().unwrap(), PlaybackMode::Stretch);
        assert_eq!(player.warm_up().unwrap(), PlaybackMode::Stretch);
        player.play();
        player.pause();
        player.play();
        assert_eq!(backend.open_contexts(), 1);
    }

    #[test]
    fn test_warm_up_without_source() {
        let backend = OfflineBackend::new(RATE);
        let mut player =
            Player::with_defaults(StationaryTrack::new(0.0), Box::new(backend), config());
        assert!(matches!(player.warm_up(), Err(EngineError::NoSource)));
    }

    #[test]
    fn test_cleanup_twice() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 2.0);
        player.play();
        assert_eq!(backend.open_contexts(), 1);

        player.cleanup();
        player.cleanup();
        assert_eq!(backend.open_contexts(), 0);
        assert!(!player.is_playing());
        assert_eq!(player.mode(), None);
    }

    #[test]
    fn test_drop_releases_graph() {
        let backend = OfflineBackend::new(RATE);
        {
            let mut player = player(&backend, 2.0);
            player.play();
        }
        assert_eq!(backend.open_contexts(), 0);
    }

    #[test]
    fn test_new_source_tears_down_old_graph() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 2.0);
        player.play();
        player.load_decoded("memory://other", tone(3.0));

        assert_eq!(backend.open_contexts(), 0);
        assert_eq!(player.mode(), None);
        assert!(!player.is_playing());
        assert_eq!(player.duration(), 3.0);
        assert_eq!(player.source_url(), Some("memory://other"));
    }

    #[test]
    fn test_end_pauses_by_default() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 1.0);
        let events = player.subscribe();
        player.play();
        player.seek(0.95);

        let report = player.tick().unwrap();
        assert!(report.ended);
        assert!(!player.is_playing());
        assert!(events.try_iter().any(|e| e == PlaybackEvent::TrackEnded));

        // No second end on the next tick
        assert!(!player.tick().unwrap().ended);
    }

    #[test]
    fn test_end_with_repeat_restarts() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 1.0);
        player.set_repeat(true);
        player.play();
        player.seek(0.95);

        assert!(player.tick().unwrap().ended);
        assert!(player.is_playing());
        assert_eq!(player.current_time(), 0.0);
    }

    #[test]
    fn test_play_at_end_starts_over() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 1.0);
        player.seek(1.0);
        player.play();
        assert_eq!(player.current_time(), 0.0);
    }

    #[test]
    fn test_visibility_restore_resumes_visual() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 10.0);
        player.play();

        player.on_visibility_change(false);
        // OS paused the element while hidden
        player.visual_mut().paused = true;
        player.tick();
        assert!(player.visual().paused);

        player.on_visibility_change(true);
        assert!(!player.visual().paused);
        assert!(player.is_playing());
    }

    #[test]
    fn test_visibility_restore_pauses_stray_visual() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 10.0);
        player.play();
        player.pause();

        player.visual_mut().paused = false;
        player.on_visibility_change(true);
        assert!(player.visual().paused);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_fallback_follows_user_pause() {
        let backend = OfflineBackend::failing(RATE);
        let mut player = Player::with_defaults(
            StationaryTrack::new(4.0),
            Box::new(backend),
            config(),
        );
        player.load_decoded("memory://tone", tone(4.0));
        player.play();
        assert!(player.is_native_fallback());

        player.visual_mut().paused = true;
        player.visual_mut().events.push(VisualEvent::Pause);
        player.tick();
        assert!(!player.is_playing());
    }

    #[test]
    fn test_fallback_ignores_background_pause_on_restore() {
        let backend = OfflineBackend::failing(RATE);
        let mut player = Player::with_defaults(
            StationaryTrack::new(4.0),
            Box::new(backend),
            config(),
        );
        player.load_decoded("memory://tone", tone(4.0));
        player.play();
        assert!(player.is_native_fallback());

        player.on_visibility_change(false);
        // OS paused the element while hidden, no tick ran before restore
        player.visual_mut().paused = true;
        player.visual_mut().events.push(VisualEvent::Pause);

        player.on_visibility_change(true);
        assert!(player.is_playing());
        assert!(!player.visual().paused);
    }

    #[test]
    fn test_fallback_user_pause_before_hide_is_kept() {
        let backend = OfflineBackend::failing(RATE);
        let mut player = Player::with_defaults(
            StationaryTrack::new(4.0),
            Box::new(backend),
            config(),
        );
        player.load_decoded("memory://tone", tone(4.0));
        player.play();

        player.visual_mut().paused = true;
        player.visual_mut().events.push(VisualEvent::Pause);
        player.on_visibility_change(false);
        assert!(!player.is_playing());

        player.on_visibility_change(true);
        assert!(!player.is_playing());
        assert!(player.visual().paused);
    }

    #[test]
    fn test_fallback_ended_event_runs_end_handler() {
        let backend = OfflineBackend::failing(RATE);
        let mut player = Player::with_defaults(
            StationaryTrack::new(4.0),
            Box::new(backend),
            config(),
        );
        player.load_decoded("memory://tone", tone(4.0));
        player.set_repeat(true);
        player.play();

        player.visual_mut().time = 1.0;
        player.visual_mut().events.push(VisualEvent::Ended);
        player.tick();
        assert!(player.is_playing());
        assert_eq!(player.visual().time, 0.0);
    }

    #[test]
    fn test_pitch_lock_follows_rate() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 2.0);
        player.set_pitch_locked(true);
        player.set_rate(0.8);
        assert_eq!(player.params().semitones, -2.49);

        player.set_pitch_locked(false);
        player.set_rate(1.0);
        assert_eq!(player.params().semitones, -2.49);
    }

    #[test]
    fn test_invalid_rate_is_ignored() {
        let backend = OfflineBackend::new(RATE);
        let mut player = player(&backend, 2.0);
        player.set_rate(0.0);
        player.set_rate(f64::NAN);
        assert_eq!(player.params().rate, 1.0);
    }

    #[test]
    fn test_snapshot_restore_before_load() {
        let backend = OfflineBackend::new(RATE);
        let mut source = player(&backend, 10.0);
        source.set_rate(0.8);
        source.set_pitch_locked(true);
        source.set_reverb_amount(0.4);
        source.set_volume(0.7);
        source.set_repeat(true);
        source.seek(3.0);
        let snapshot = source.snapshot();
        assert_eq!(snapshot.position, 3.0);
        assert_eq!(snapshot.semitones, -2.49);

        let mut restored =
            Player::with_defaults(StationaryTrack::new(10.0), Box::new(backend.clone()), config());
        restored.restore(&snapshot);
        restored.load_decoded("memory://tone", tone(10.0));

        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_events_and_hooks() {
        let backend = OfflineBackend::new(RATE);
        let log = Rc::new(RefCell::new(HookLog::default()));
        let mut player = Player::new(
            StationaryTrack::new(2.0),
            Box::new(backend),
            Box::new(RecordingHooks(log.clone())),
            config(),
        );
        let events = player.subscribe();

        player.load_decoded("memory://tone", tone(2.0));
        player.play();
        player.pause();
        player.cleanup();

        let events: Vec<_> = events.try_iter().collect();
        assert!(events.contains(&PlaybackEvent::StateChanged(EngineState::Ready)));
        assert!(events.contains(&PlaybackEvent::ModeSelected(PlaybackMode::Stretch)));
        assert!(events.contains(&PlaybackEvent::PlayingChanged(true)));
        assert!(events.contains(&PlaybackEvent::PlayingChanged(false)));

        let log = log.borrow();
        assert_eq!(log.playing, vec![true, false]);
        assert!(log.positions > 0);
        assert_eq!(log.clears, 1);
    }

    #[test]
    fn test_background_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(RATE as usize * 2) {
            writer.write_sample((i % 100) as i16 * 50).unwrap();
        }
        writer.finalize().unwrap();

        let backend = OfflineBackend::new(RATE);
        let mut player =
            Player::with_defaults(StationaryTrack::new(1.0), Box::new(backend), config());
        player.load(path.to_str().unwrap());
        assert_eq!(player.state(), EngineState::Loading);
        assert!(player.is_loading());

        let state = player.wait_until_loaded(Duration::from_secs(10));
        assert_eq!(state, EngineState::Ready);
        assert!((player.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_background_load_is_error() {
        let backend = OfflineBackend::new(RATE);
        let mut player =
            Player::with_defaults(StationaryTrack::new(1.0), Box::new(backend), config());
        let events = player.subscribe();
        player.load("/no/such/file.wav");
        let state = player.wait_until_loaded(Duration::from_secs(10));

        assert_eq!(state, EngineState::Error);
        assert!(events
            .try_iter()
            .any(|e| matches!(e, PlaybackEvent::LoadFailed(_))));
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let backend = OfflineBackend::new(RATE);
        let mut player =
            Player::with_defaults(StationaryTrack::new(1.0), Box::new(backend), config());
        player.load("/no/such/first.wav");
        player.load_decoded("memory://second", tone(1.0));

        assert!(!player.is_loading());
        assert_eq!(player.state(), EngineState::Ready);
        std::thread::sleep(Duration::from_millis(50));
        player.tick();
        assert_eq!(player.state(), EngineState::Ready);
        assert_eq!(player.source_url(), Some("memory://second"));
    }
}
