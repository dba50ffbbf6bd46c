//! Media decoding
//!
//! Turns a URL or path into a [`SampleBuffer`] of channel-separated f32
//! samples. Decoding is delegated to symphonia; this module adds retrieval,
//! a bound on total load time, and cooperative cancellation.
//!
//! Loads block the calling thread. Use [`PendingLoad`] to run one in the
//! background.

mod error;
mod fetch;
mod loader;

pub use error::{DecodeError, DecodeResult};
pub use loader::PendingLoad;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;

use crate::config::DecoderConfig;
use crate::types::SampleBuffer;

/// Cooperative cancellation flag shared with an in-flight load
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the load stops at its next check
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Absolute end of a load's time budget
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    /// Deadline `limit` from now
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    pub(crate) fn timeout_error(&self) -> DecodeError {
        DecodeError::Timeout {
            seconds: self.limit.as_secs(),
        }
    }

    /// Fail with `Cancelled` or `Timeout` if the load should stop
    pub(crate) fn check(&self, cancel: &CancelToken) -> DecodeResult<()> {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        if self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }
}

/// Retrieves and decodes media into sample buffers
#[derive(Debug, Clone, Default)]
pub struct MediaDecoder {
    config: DecoderConfig,
}

impl MediaDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Fetch and decode `url`, bounded by the configured load timeout
    pub fn load(&self, url: &str, cancel: &CancelToken) -> DecodeResult<SampleBuffer> {
        self.load_until(url, cancel, Deadline::after(self.config.load_timeout()))
    }

    /// Fetch and decode `url` against an existing deadline
    pub fn load_until(
        &self,
        url: &str,
        cancel: &CancelToken,
        deadline: Deadline,
    ) -> DecodeResult<SampleBuffer> {
        let fetched = fetch::fetch(url, &deadline, cancel)?;
        let buffer = decode(fetched, &deadline, cancel)?;

        log::info!(
            "MediaDecoder: decoded {} ({} ch, {}Hz, {:.2}s)",
            url,
            buffer.channel_count(),
            buffer.sample_rate(),
            buffer.duration_seconds()
        );
        Ok(buffer)
    }
}

fn decode(
    fetched: fetch::Fetched,
    deadline: &Deadline,
    cancel: &CancelToken,
) -> DecodeResult<SampleBuffer> {
    let mss = MediaSourceStream::new(fetched.source, Default::default());

    let detected = symphonia::default::get_probe()
        .format(
            &fetched.hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut format = detected.format;

    // First audio track; video and subtitle tracks have no audio codec
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut interleaved: Option<InterleavedBuffer<f32>> = None;

    loop {
        deadline.check(cancel)?;

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("MediaDecoder: error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("MediaDecoder: skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                log::warn!("MediaDecoder: decoder failed: {}", e);
                break;
            }
        };

        let spec = *decoded.spec();
        channel_count = spec.channels.count();

        // Interleaved capacity counts samples, the decoded capacity counts frames
        let needed = decoded.capacity() * channel_count;
        if interleaved.as_ref().map_or(true, |buf| buf.capacity() < needed) {
            interleaved = Some(InterleavedBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = interleaved.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if samples.is_empty() || channel_count == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(SampleBuffer::from_interleaved(&samples, channel_count, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * 16000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn fixture(dir: &tempfile::TempDir, name: &str, channels: u16, frames: usize) -> PathBuf {
        let path = dir.path().join(name);
        write_wav(&path, channels, 8000, frames);
        path
    }

    #[test]
    fn test_decode_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, "tone.wav", 2, 8000);

        let decoder = MediaDecoder::default();
        let buffer = decoder
            .load(path.to_str().unwrap(), &CancelToken::new())
            .unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.frames(), 8000);
        assert!((buffer.duration_seconds() - 1.0).abs() < 1e-9);
        assert!(buffer.validate().is_ok());
    }

    #[test]
    fn test_decode_mono_wav_via_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, "mono.wav", 1, 4000);
        let url = format!("file://{}", path.display());

        let buffer = MediaDecoder::default()
            .load(&url, &CancelToken::new())
            .unwrap();

        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.frames(), 4000);
        let frame = buffer.stereo_frame(100);
        assert_eq!(frame.left, frame.right);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.wav");
        let err = MediaDecoder::default()
            .load(path.to_str().unwrap(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, b"this is definitely not an audio container").unwrap();

        let err = MediaDecoder::default()
            .load(path.to_str().unwrap(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedFormat(_) | DecodeError::NoAudioTrack
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, "tone.wav", 2, 800);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = MediaDecoder::default()
            .load(path.to_str().unwrap(), &cancel)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Cancelled));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, "tone.wav", 2, 800);

        let err = MediaDecoder::default()
            .load_until(
                path.to_str().unwrap(),
                &CancelToken::new(),
                Deadline::after(Duration::ZERO),
            )
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_deadline_remaining_saturates() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);

        let deadline = Deadline::after(Duration::from_secs(30));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(29));
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
