//! Dry/wet reverb mix
//!
//! Signal flow per block:
//!
//! ```text
//! input ─┬─ dry gain ──────────────┬─ master gain ─ output
//!        └─ convolver ─ wet gain ──┘
//! ```
//!
//! [`ReverbMixGraph`] lives on the control thread and sends gain targets over
//! an `rtrb` ringbuffer; [`ReverbMixNode`] owns the convolver and applies
//! them at the start of the next block.
//!
//! Every command carries both targets, so when the queue is full the graph
//! only has to hold on to the latest pair and send it once there is room.

use super::{Convolver, Effect, SmoothedGain};
use crate::audio::MAX_BUFFER_SIZE;
use crate::types::StereoBuffer;

/// Mix command queue capacity
const MIX_QUEUE_CAPACITY: usize = 64;

/// Dry and wet gains for a reverb amount
///
/// The dry path only dips to half at full wetness so the source stays
/// present. Amounts outside 0.0-1.0 are clamped.
#[inline]
pub fn reverb_gains(amount: f32) -> (f32, f32) {
    let amount = if amount.is_nan() { 0.0 } else { amount.clamp(0.0, 1.0) };
    (1.0 - amount * 0.5, amount)
}

/// Full set of mix targets
#[derive(Debug, Clone, Copy)]
struct MixTargets {
    amount: f32,
    volume: f32,
}

/// Create a linked control/render pair around `convolver`
pub fn reverb_mix_pair(convolver: Convolver, amount: f32, volume: f32) -> (ReverbMixGraph, ReverbMixNode) {
    let (command_tx, command_rx) = rtrb::RingBuffer::new(MIX_QUEUE_CAPACITY);
    let (dry, wet) = reverb_gains(amount);

    let graph = ReverbMixGraph {
        command_tx,
        amount,
        volume,
        dirty: false,
    };
    let node = ReverbMixNode {
        command_rx,
        convolver,
        dry: SmoothedGain::new(dry),
        wet: SmoothedGain::new(wet),
        master: SmoothedGain::new(volume),
        wet_buffer: StereoBuffer::silence(MAX_BUFFER_SIZE),
    };
    (graph, node)
}

/// Control half of the reverb mix
pub struct ReverbMixGraph {
    command_tx: rtrb::Producer<MixTargets>,
    amount: f32,
    volume: f32,
    /// Targets changed but not yet queued
    dirty: bool,
}

impl ReverbMixGraph {
    /// Set the reverb wetness (0.0-1.0)
    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount;
        self.dirty = true;
        self.flush();
    }

    /// Set the master volume (0.0-1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.dirty = true;
        self.flush();
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Whether the latest targets are still waiting for queue space
    pub fn has_pending(&self) -> bool {
        self.dirty
    }

    /// Queue the latest targets if they have not been sent yet
    ///
    /// Returns false while the queue is still full.
    pub fn flush(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        let targets = MixTargets {
            amount: self.amount,
            volume: self.volume,
        };
        if self.command_tx.push(targets).is_err() {
            log::debug!("ReverbMixGraph: command queue full, holding latest targets");
            return false;
        }
        self.dirty = false;
        true
    }
}

/// Render half of the reverb mix
pub struct ReverbMixNode {
    command_rx: rtrb::Consumer<MixTargets>,
    convolver: Convolver,
    dry: SmoothedGain,
    wet: SmoothedGain,
    master: SmoothedGain,
    /// Pre-allocated scratch for the wet path
    wet_buffer: StereoBuffer,
}

impl ReverbMixNode {
    fn drain_commands(&mut self) {
        while let Ok(targets) = self.command_rx.pop() {
            let (dry, wet) = reverb_gains(targets.amount);
            self.dry.set_target(dry);
            self.wet.set_target(wet);
            // Master tracks volume only; wetness never touches it
            let volume = if targets.volume.is_nan() { 0.0 } else { targets.volume.clamp(0.0, 1.0) };
            self.master.set_target(volume);
        }
    }

    fn process_chunk(&mut self, chunk: &mut StereoBuffer) {
        self.wet_buffer.copy_from(chunk);
        self.convolver.process(&mut self.wet_buffer);
        self.wet.process(&mut self.wet_buffer);

        self.dry.process(chunk);
        chunk.add_buffer(&self.wet_buffer);
        self.master.process(chunk);
    }
}

impl Effect for ReverbMixNode {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        self.drain_commands();
        debug_assert!(buffer.len() <= MAX_BUFFER_SIZE, "block larger than mix scratch");
        self.process_chunk(buffer);
    }

    fn latency_samples(&self) -> u32 {
        // Dry path is not delayed; only the wet tail carries convolver latency
        0
    }

    fn reset(&mut self) {
        self.convolver.reset();
        self.dry.reset();
        self.wet.reset();
        self.master.reset();
    }
}
