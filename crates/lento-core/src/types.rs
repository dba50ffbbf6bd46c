//! Common types for Lento
//!
//! This module contains the fundamental audio types used throughout the
//! engine: the stereo render buffers, the decoded sample buffer, playback
//! parameters and the observable engine/transport state.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Default output sample rate (48kHz)
///
/// Only a preference; the render backend reports the real device rate.
pub const SAMPLE_RATE: u32 = 48000;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A single stereo sample (left and right channels)
///
/// Uses `#[repr(C)]` to ensure predictable memory layout: [left, right].
/// This enables zero-copy conversion between `&[StereoSample]` and `&[f32]`
/// (interleaved format) using bytemuck, which is what signalsmith-stretch expects.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    /// Create a new stereo sample
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Create a silent stereo sample
    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Create a mono sample (same value in both channels)
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Get the peak amplitude (max of abs(left), abs(right))
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo samples
///
/// This is the buffer type flowing through the render graph. Render callbacks
/// pre-allocate these and only resize within capacity.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    /// Create a buffer from an existing Vec of StereoSamples
    pub fn from_vec(samples: Vec<StereoSample>) -> Self {
        Self { samples }
    }

    /// Get the number of stereo samples in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Fills any newly exposed elements with silence. Does not allocate as long
    /// as `new_len` stays within the capacity.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        let current_len = self.samples.len();
        if new_len > current_len {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    /// Fill the buffer with silence
    pub fn fill_silence(&mut self) {
        self.samples.fill(StereoSample::silence());
    }

    /// Get a slice of the samples
    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    /// Get a mutable slice of the samples
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Get a zero-copy view of samples as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Get a zero-copy mutable view of samples as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.samples)
    }

    /// Add another buffer to this one (summing samples)
    pub fn add_buffer(&mut self, other: &StereoBuffer) {
        assert_eq!(self.len(), other.len(), "Buffer lengths must match");
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
    }

    /// Scale all samples by a factor
    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Copy from another buffer (real-time safe if pre-allocated)
    pub fn copy_from(&mut self, other: &StereoBuffer) {
        let len = other.samples.len();
        debug_assert!(
            len <= self.samples.capacity(),
            "copy_from: insufficient capacity ({} < {})",
            self.samples.capacity(),
            len
        );
        self.set_len_from_capacity(len);
        self.samples[..len].copy_from_slice(&other.samples[..len]);
    }

    /// Get an iterator over the samples
    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    /// Get a mutable iterator over the samples
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StereoSample> {
        self.samples.iter_mut()
    }

    /// Get the peak amplitude in the buffer
    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.peak()).fold(0.0, Sample::max)
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}

/// Decoded audio, channel-separated
///
/// Produced once by the decoder and never mutated afterwards. Shared between
/// the control side and the render thread behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wrap channel data decoded at `sample_rate`
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Build a buffer from interleaved samples
    pub fn from_interleaved(interleaved: &[Sample], channel_count: usize, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &value) in frame.iter().enumerate() {
                channels[ch].push(value);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Sample rate of the decoded data
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Raw channel data
    pub fn channel(&self, index: usize) -> Option<&[Sample]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Read one frame folded to stereo
    ///
    /// Mono is duplicated to both sides; channels past the second are ignored.
    /// Out-of-range frames read as silence.
    #[inline]
    pub fn stereo_frame(&self, frame: usize) -> StereoSample {
        match self.channels.len() {
            0 => StereoSample::silence(),
            1 => StereoSample::mono(self.channels[0].get(frame).copied().unwrap_or(0.0)),
            _ => StereoSample::new(
                self.channels[0].get(frame).copied().unwrap_or(0.0),
                self.channels[1].get(frame).copied().unwrap_or(0.0),
            ),
        }
    }

    /// Check the buffer can be attached to a render graph
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate is zero".to_string());
        }
        if self.channels.is_empty() {
            return Err("buffer has no channels".to_string());
        }
        let frames = self.frames();
        if frames == 0 {
            return Err("buffer has no frames".to_string());
        }
        if self.channels.iter().any(|c| c.len() != frames) {
            return Err("channel lengths differ".to_string());
        }
        Ok(())
    }
}

/// A decoded media source
///
/// Replaced wholesale when the source URL changes.
#[derive(Debug, Clone)]
pub struct MediaSource {
    /// URL or path the buffer was decoded from
    pub url: String,
    /// Decoded samples
    pub buffer: Arc<SampleBuffer>,
}

impl MediaSource {
    pub fn new(url: impl Into<String>, buffer: Arc<SampleBuffer>) -> Self {
        Self {
            url: url.into(),
            buffer,
        }
    }

    /// Duration of the decoded audio in seconds
    pub fn duration(&self) -> f64 {
        self.buffer.duration_seconds()
    }
}

/// Listener-controlled playback parameters (last writer wins)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackParams {
    /// Temporal stretch factor (1.0 = original speed), always > 0
    pub rate: f64,
    /// Pitch shift in half-steps
    pub semitones: f64,
    /// Reverb wetness (0.0-1.0)
    pub reverb_amount: f32,
    /// Output volume (0.0-1.0)
    pub volume: f32,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            semitones: 0.0,
            reverb_amount: 0.0,
            volume: 1.0,
        }
    }
}

impl PlaybackParams {
    /// Set the rate, ignoring values that are not finite and positive
    ///
    /// Returns whether the value was accepted.
    pub fn set_rate(&mut self, rate: f64) -> bool {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
            true
        } else {
            false
        }
    }

    /// Set the pitch shift, ignoring non-finite values
    pub fn set_semitones(&mut self, semitones: f64) -> bool {
        if semitones.is_finite() {
            self.semitones = semitones;
            true
        } else {
            false
        }
    }

    /// Set reverb wetness, clamped to 0.0-1.0
    pub fn set_reverb_amount(&mut self, amount: f32) {
        self.reverb_amount = clamp_unit(amount);
    }

    /// Set volume, clamped to 0.0-1.0
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_unit(volume);
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Lifecycle of the engine for the current source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Constructed or source changed, decode in flight
    #[default]
    Loading,
    /// Sample buffer decoded and sync loop armed
    Ready,
    /// Decode or setup failed; terminal until a new source is supplied
    Error,
}

/// Which path produces audible output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackMode {
    /// Time/pitch render graph; the visual track is muted
    Stretch,
    /// The visual track's own native rate control
    NativeFallback,
}

/// Observable transport snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportState {
    pub is_playing: bool,
    /// Position in the original timeline, clamped to `[0, duration]`
    pub current_time: f64,
    pub duration: f64,
    /// None until the first `play()` (or `warm_up()`) chose a path
    pub mode: Option<PlaybackMode>,
}
