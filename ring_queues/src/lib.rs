//! Queue engines for packet DMA descriptor rings.
//!
//! A ring is a fixed power-of-two array of descriptor slots whose ownership
//! shuttles between software and a hardware DMA engine. This crate drives
//! that protocol for both directions: [`TxQueue`] turns fragment lists into
//! published descriptor runs and reaps their completions; [`RxQueue`] keeps
//! the ring stocked with buffers and delivers what hardware writes back.
//! The descriptor bit layouts, buffer pooling, and register access all live
//! in their own crates; everything here is vendor-neutral.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use] extern crate log;

pub mod backpressure;
pub mod error;
pub mod moderation;
pub mod rx;
pub mod tx;

#[cfg(test)]
pub(crate) mod sim;

pub use backpressure::QueueBackpressure;
pub use error::Error;
pub use moderation::InterruptModerator;
pub use rx::{RxPacket, RxPayload, RxPollSummary, RxQueue};
pub use tx::{ReapSummary, SubmitOutcome, TxQueue};

use core::fmt;

use ring_slots::{MAX_RING_DEPTH, MIN_RING_DEPTH};

/// Receive buffers never shrink below this, whatever the configured MTU.
pub const MIN_RX_BUFFER_LEN: u16 = 256;

/// Bytes of Ethernet framing (header plus FCS) on top of the MTU.
pub const RX_FRAME_OVERHEAD: u16 = 18;

/// Identifies one queue of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueId(pub u8);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-packet token the submitter gets back on completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHandle(pub u64);

/// Whether a poll pass finished its backlog or must be chained.
///
/// `MoreWork` means the interrupt stays masked and the caller schedules
/// another immediate pass; unmasking happens only on `Complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Complete,
    MoreWork,
}

/// Per-queue tunables, validated when the queue opens.
#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    /// Number of descriptor slots; a power of two.
    pub depth: usize,
    /// Hardware's descriptor-per-packet limit, excluding the context slot.
    pub max_frags_per_packet: u16,
    /// Submissions stop once free slots fall below this.
    pub worst_case_descriptors: u16,
    /// Submissions resume once free slots exceed this. Strictly above the
    /// stop threshold so the queue cannot flap.
    pub resume_threshold: u16,
    /// Frames at or below this length are delivered as copies.
    pub copy_break: u16,
    /// Largest ordinary frame the queue carries; receive buffer capacity
    /// is derived from it. See [`RingConfig::rx_buffer_len`].
    pub mtu: u16,
}

impl Default for RingConfig {
    fn default() -> Self {
        RingConfig {
            depth: 256,
            max_frags_per_packet: 16,
            // One context slot plus one slot of headroom on top of the
            // fragment limit.
            worst_case_descriptors: 18,
            resume_threshold: 36,
            copy_break: 256,
            mtu: 1500,
        }
    }
}

impl RingConfig {
    /// Capacity of each pooled receive buffer: the MTU plus Ethernet
    /// framing, floored at [`MIN_RX_BUFFER_LEN`]. A frame that still does
    /// not fit one buffer spans slots.
    pub fn rx_buffer_len(&self) -> u16 {
        let need = self.mtu.saturating_add(RX_FRAME_OVERHEAD);
        if need < MIN_RX_BUFFER_LEN {
            MIN_RX_BUFFER_LEN
        } else {
            need
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.depth.is_power_of_two()
            || self.depth < MIN_RING_DEPTH
            || self.depth > MAX_RING_DEPTH
        {
            return Err(Error::InvalidDepth);
        }
        if self.max_frags_per_packet == 0 || self.worst_case_descriptors == 0 {
            return Err(Error::InvalidConfig);
        }
        if self.resume_threshold <= self.worst_case_descriptors
            || self.resume_threshold as usize > self.depth
        {
            return Err(Error::InvalidConfig);
        }
        if self.mtu == 0 || self.copy_break > self.rx_buffer_len() {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// The layer above the queues: a protocol stack, a forwarder, a test rig.
///
/// Every queue operation that produces an upward event takes the client by
/// reference, so the engine itself holds no global callbacks.
pub trait RingClient {
    /// A received frame, either copied or loaning its ring buffers.
    fn deliver_rx_packet(&mut self, queue: QueueId, packet: RxPacket);

    /// The packet submitted under `handle` fully left the ring.
    fn packet_transmitted(&mut self, queue: QueueId, handle: PacketHandle, bytes: usize);

    /// The queue ran out of headroom; stop submitting until resumed.
    fn queue_stopped(&mut self, queue: QueueId);

    /// The queue has room again.
    fn queue_resumed(&mut self, queue: QueueId);
}
