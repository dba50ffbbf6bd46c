//! Partitioned FFT convolution
//!
//! Uniformly partitioned overlap-save convolution of a stereo signal with a
//! stereo impulse response. The impulse is split into blocks of `B` samples,
//! each transformed once at construction. Every `B` input samples the newest
//! input spectrum enters a frequency-domain delay line and is multiplied
//! against all partitions, so cost per sample is independent of block size
//! and latency is exactly one block.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};

use super::Effect;
use crate::types::StereoBuffer;

/// Smallest partition accepted; smaller sizes are rounded up
pub const MIN_PARTITION_SIZE: usize = 16;

/// Per-channel convolution state
struct Channel {
    /// Spectra of the impulse partitions
    partitions: Vec<Vec<Complex<f32>>>,
    /// Ring of past input spectra, one per partition
    history: Vec<Vec<Complex<f32>>>,
    /// Previous and current input blocks (2B samples)
    window: Vec<f32>,
    /// Input block being filled
    input: Vec<f32>,
    /// Output block being played out
    output: Vec<f32>,
}

/// Stereo partitioned convolver
pub struct Convolver {
    block: usize,
    fft_size: usize,
    partition_count: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    channels: [Channel; 2],
    /// Index of the newest spectrum in each history ring
    head: usize,
    /// Position inside the current block
    pos: usize,
    time_scratch: Vec<f32>,
    accum: Vec<Complex<f32>>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl Convolver {
    /// Prepare a convolver for `impulse` with the given partition size
    ///
    /// The partition size is rounded up to a power of two of at least
    /// [`MIN_PARTITION_SIZE`].
    pub fn new(impulse: &StereoBuffer, partition_size: usize) -> Result<Self, FftError> {
        let block = partition_size.max(MIN_PARTITION_SIZE).next_power_of_two();
        let fft_size = block * 2;
        let bins = block + 1;
        let partition_count = impulse.len().div_ceil(block).max(1);

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let mut time_scratch = forward.make_input_vec();
        let mut forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();

        let mut split = |pick: fn(&crate::types::StereoSample) -> f32| -> Result<Channel, FftError> {
            let mut partitions = Vec::with_capacity(partition_count);
            for p in 0..partition_count {
                time_scratch.fill(0.0);
                let start = p * block;
                let end = (start + block).min(impulse.len());
                for (dst, src) in time_scratch
                    .iter_mut()
                    .zip(impulse.as_slice()[start.min(end)..end].iter())
                {
                    *dst = pick(src);
                }
                let mut spectrum = forward.make_output_vec();
                forward.process_with_scratch(&mut time_scratch, &mut spectrum, &mut forward_scratch)?;
                partitions.push(spectrum);
            }
            Ok(Channel {
                partitions,
                history: vec![vec![Complex::new(0.0, 0.0); bins]; partition_count],
                window: vec![0.0; fft_size],
                input: vec![0.0; block],
                output: vec![0.0; block],
            })
        };

        let left = split(|s| s.left)?;
        let right = split(|s| s.right)?;

        log::debug!(
            "Convolver: {} frames in {} partitions of {}",
            impulse.len(),
            partition_count,
            block
        );

        Ok(Self {
            block,
            fft_size,
            partition_count,
            forward,
            inverse,
            channels: [left, right],
            head: 0,
            pos: 0,
            time_scratch,
            accum: vec![Complex::new(0.0, 0.0); bins],
            forward_scratch,
            inverse_scratch,
        })
    }

    /// Partition (and latency) size in samples
    pub fn block_size(&self) -> usize {
        self.block
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    fn process_block(&mut self) {
        let block = self.block;
        let count = self.partition_count;
        // Step the ring backwards so `head + k` is the spectrum from k blocks ago
        self.head = (self.head + count - 1) % count;
        let head = self.head;
        let scale = 1.0 / self.fft_size as f32;

        for channel in self.channels.iter_mut() {
            channel.window.copy_within(block.., 0);
            channel.window[block..].copy_from_slice(&channel.input);
            self.time_scratch.copy_from_slice(&channel.window);

            if self
                .forward
                .process_with_scratch(
                    &mut self.time_scratch,
                    &mut channel.history[head],
                    &mut self.forward_scratch,
                )
                .is_err()
            {
                channel.output.fill(0.0);
                continue;
            }

            self.accum.fill(Complex::new(0.0, 0.0));
            for k in 0..count {
                let x = &channel.history[(head + k) % count];
                let h = &channel.partitions[k];
                for ((acc, x), h) in self.accum.iter_mut().zip(x).zip(h) {
                    *acc += x * h;
                }
            }

            // Inverse real FFT requires real DC and Nyquist bins
            self.accum[0].im = 0.0;
            if let Some(nyquist) = self.accum.last_mut() {
                nyquist.im = 0.0;
            }

            if self
                .inverse
                .process_with_scratch(
                    &mut self.accum,
                    &mut self.time_scratch,
                    &mut self.inverse_scratch,
                )
                .is_err()
            {
                channel.output.fill(0.0);
                continue;
            }

            // Only the second half of the circular result is alias-free
            for (out, t) in channel.output.iter_mut().zip(&self.time_scratch[block..]) {
                *out = t * scale;
            }
        }
    }
}

impl Effect for Convolver {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for frame in buffer.iter_mut() {
            let pos = self.pos;
            let [left, right] = &mut self.channels;
            left.input[pos] = frame.left;
            right.input[pos] = frame.right;
            frame.left = left.output[pos];
            frame.right = right.output[pos];

            self.pos += 1;
            if self.pos == self.block {
                self.pos = 0;
                self.process_block();
            }
        }
    }

    fn latency_samples(&self) -> u32 {
        self.block as u32
    }

    fn reset(&mut self) {
        for channel in self.channels.iter_mut() {
            for spectrum in channel.history.iter_mut() {
                spectrum.fill(Complex::new(0.0, 0.0));
            }
            channel.window.fill(0.0);
            channel.input.fill(0.0);
            channel.output.fill(0.0);
        }
        self.head = 0;
        self.pos = 0;
    }
}
