//! Time-stretching via signalsmith-stretch
//!
//! Wraps the signalsmith-stretch library for rate-controlled playback with an
//! independent pitch shift. The stretch ratio is implied by how many input
//! frames are handed over for each output block; pitch is set separately.

use signalsmith_stretch::Stretch;

use crate::types::StereoBuffer;

/// Number of channels (stereo)
const CHANNELS: u32 = 2;

/// Transpose range accepted by the stretcher (semitones)
const MAX_TRANSPOSE: f64 = 24.0;

/// Time stretcher with independent pitch shifting
///
/// Uses zero-copy format conversion - StereoBuffer is reinterpreted as
/// interleaved f32 without any per-frame copying.
pub struct TimeStretcher {
    /// The underlying signalsmith stretcher
    stretcher: Stretch,
    /// Output sample rate the stretcher was configured for
    sample_rate: u32,
    /// Pitch shift in semitones (positive = up, negative = down)
    pitch_semitones: f64,
}

impl TimeStretcher {
    /// Create a new time stretcher with the specified output sample rate
    pub fn new_with_sample_rate(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            sample_rate,
            pitch_semitones: 0.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Input frames to consume per output frame
    ///
    /// `rate` is the playback speed in the source timeline; a source decoded
    /// at a different rate than the output needs proportionally more or fewer
    /// frames for the same wall-clock duration.
    pub fn input_ratio(rate: f64, source_rate: u32, output_rate: u32) -> f64 {
        if source_rate == 0 || output_rate == 0 {
            return rate;
        }
        rate * source_rate as f64 / output_rate as f64
    }

    /// Pitch correction that cancels a source/output sample rate mismatch
    ///
    /// Feeding 44.1kHz frames to a 48kHz stretcher keeps the period in
    /// samples, which would raise pitch by 48000/44100. Transposing by
    /// `12*log2(source/output)` undoes that.
    pub fn rate_correction_semitones(source_rate: u32, output_rate: u32) -> f64 {
        if source_rate == 0 || output_rate == 0 {
            return 0.0;
        }
        12.0 * (source_rate as f64 / output_rate as f64).log2()
    }

    /// Set pitch shift in semitones (positive = up, negative = down)
    ///
    /// Clamped to two octaves either way.
    pub fn set_pitch_semitones(&mut self, semitones: f64) {
        self.pitch_semitones = semitones.clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE);
        // None for tonality_limit means no limit on formant preservation
        self.stretcher
            .set_transpose_factor_semitones(self.pitch_semitones as f32, None);
    }

    /// Get the current pitch shift in semitones
    pub fn pitch_semitones(&self) -> f64 {
        self.pitch_semitones
    }

    /// Get the input latency in samples
    pub fn input_latency(&self) -> usize {
        self.stretcher.input_latency()
    }

    /// Get the output latency in samples
    pub fn output_latency(&self) -> usize {
        self.stretcher.output_latency()
    }

    /// Reset the stretcher state (used on hard seeks)
    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Process audio through the time stretcher
    ///
    /// The stretch ratio is `input.len() / output.len()`:
    /// - input longer than output: speedup
    /// - input shorter than output: slowdown
    pub fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer) {
        if input.is_empty() {
            output.fill_silence();
            return;
        }

        let input_len = input.len();
        let output_len = output.len();

        // Thanks to #[repr(C)] on StereoSample, [StereoSample] has the same layout as [f32]
        let input_interleaved = input.as_interleaved();
        let output_interleaved = output.as_interleaved_mut();

        output_interleaved[..output_len * 2].fill(0.0);

        self.stretcher.process(
            &input_interleaved[..input_len * 2],
            &mut output_interleaved[..output_len * 2],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_stretcher_creation() {
        let stretcher = TimeStretcher::new_with_sample_rate(44100);
        assert_eq!(stretcher.sample_rate(), 44100);
        assert_eq!(stretcher.pitch_semitones(), 0.0);
        assert!(stretcher.input_latency() > 0);
        assert!(stretcher.output_latency() > 0);
    }

    #[test]
    fn test_input_ratio() {
        assert_eq!(TimeStretcher::input_ratio(1.0, 48000, 48000), 1.0);
        assert!((TimeStretcher::input_ratio(0.8, 48000, 48000) - 0.8).abs() < 1e-12);
        assert!((TimeStretcher::input_ratio(1.0, 44100, 48000) - 0.91875).abs() < 1e-12);
    }

    #[test]
    fn test_rate_correction() {
        assert_eq!(TimeStretcher::rate_correction_semitones(48000, 48000), 0.0);
        assert!((TimeStretcher::rate_correction_semitones(24000, 48000) + 12.0).abs() < 1e-9);
        assert!(TimeStretcher::rate_correction_semitones(44100, 48000) < 0.0);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut stretcher = TimeStretcher::new_with_sample_rate(8000);
        stretcher.set_pitch_semitones(-2.49);
        assert_eq!(stretcher.pitch_semitones(), -2.49);
        stretcher.set_pitch_semitones(100.0);
        assert_eq!(stretcher.pitch_semitones(), MAX_TRANSPOSE);
    }

    #[test]
    fn test_process_fills_output_length() {
        let mut stretcher = TimeStretcher::new_with_sample_rate(8000);
        let input = StereoBuffer::silence(410);
        let mut output = StereoBuffer::silence(512);
        stretcher.process(&input, &mut output);
        assert_eq!(output.len(), 512);
        assert_eq!(output.peak(), 0.0);
    }
}
