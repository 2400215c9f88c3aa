//! Descriptor codecs for the packet DMA ring engine.
//!
//! Every supported controller family lays its descriptor words out
//! differently, but the ring algorithm only ever needs a handful of
//! operations on a slot: encode a fragment, encode an offload context,
//! hand the slot to hardware, and decode what hardware wrote back.
//! Those operations are the [`TxDescriptor`] and [`RxDescriptor`] traits;
//! the concrete bit layouts live in the [`basic`] and [`parity`] codec
//! modules and nowhere else.

#![cfg_attr(not(test), no_std)]

#[macro_use] extern crate bitflags;
#[macro_use] extern crate static_assertions;

pub mod basic;
pub mod parity;

use core::fmt;

/// A bus address as seen by the device's DMA engine.
///
/// Produced by the platform's mapping layer; the engine never dereferences
/// one, it only writes them into descriptors.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DmaAddress(pub u64);

impl DmaAddress {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DmaAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DmaAddress({:#X})", self.0)
    }
}

/// One contiguous region of an outgoing packet, in host address space.
/// The submission path maps each fragment before encoding it.
#[derive(Clone, Copy, Debug)]
pub struct Fragment {
    /// Host address of the first byte of the region.
    pub addr: usize,
    /// Length of the region in bytes.
    pub len: u16,
}

bitflags! {
    /// Per-slot flags the submission path asks a codec to encode.
    pub struct TxSlotFlags: u8 {
        /// This slot starts a packet.
        const START_OF_PACKET = 1 << 0;
        /// This slot ends a packet.
        const END_OF_PACKET   = 1 << 1;
        /// Hardware should raise a completion interrupt for this slot.
        const REQUEST_IRQ     = 1 << 2;
    }
}

/// Offload parameters that apply to a whole packet rather than to any one
/// fragment. When any of them are requested the packet is preceded by one
/// context descriptor carrying them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxOffload {
    /// Insert a checksum computed from `checksum_start` at `checksum_offset`.
    pub insert_checksum: bool,
    /// Byte offset where checksumming begins.
    pub checksum_start: u8,
    /// Byte offset (from `checksum_start`) where the result is inserted.
    pub checksum_offset: u8,
    /// Maximum segment size for hardware segmentation, if requested.
    pub segment_size: Option<u16>,
    /// VLAN tag to insert on the wire, if any.
    pub vlan_tag: Option<u16>,
    /// Request a hardware transmit timestamp.
    pub timestamp: bool,
}

impl TxOffload {
    /// Returns true if this packet needs a leading context descriptor.
    pub fn requires_context(&self) -> bool {
        self.insert_checksum
            || self.segment_size.is_some()
            || self.vlan_tag.is_some()
            || self.timestamp
    }
}

/// What hardware reported for one completed receive slot, decoded out of
/// the vendor-specific write-back format.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompletionRecord {
    /// Number of bytes hardware placed in the slot's buffer.
    pub length: u16,
    /// True if this slot is the last one of its frame.
    pub end_of_packet: bool,
    /// True if hardware flagged the frame as bad (CRC/length/etc.).
    /// The frame is dropped without delivery.
    pub error: bool,
    /// True if hardware validated the frame's checksums.
    pub checksum_ok: bool,
    /// VLAN tag stripped from the frame, for codecs that report one.
    pub vlan_tag: Option<u16>,
    /// Receive-side-scaling hash, for codecs that compute one.
    pub rss_hash: Option<u32>,
}

/// Operations the ring algorithm needs from a transmit descriptor.
///
/// Encoding and ownership publication are split so that the slot table can
/// place a memory barrier between writing a run's contents and setting the
/// ownership flag that lets hardware chase it.
pub trait TxDescriptor: Default {
    /// Clears the descriptor to its power-on state.
    fn init(&mut self);

    /// Encodes a context descriptor carrying packet-wide offload parameters.
    fn write_context(&mut self, offload: &TxOffload);

    /// Encodes one fragment of a packet.
    fn write_fragment(&mut self, addr: DmaAddress, len: u16, flags: TxSlotFlags);

    /// Hands the descriptor to hardware.
    ///
    /// `parity` is the ring's wrap-generation bit for this slot; codecs
    /// that express ownership through a status byte ignore it.
    fn publish(&mut self, parity: bool);

    /// True once hardware has consumed this descriptor.
    fn is_done(&self, parity: bool) -> bool;
}

/// Operations the ring algorithm needs from a receive descriptor.
pub trait RxDescriptor: Default {
    /// Clears the descriptor to its power-on state.
    fn init(&mut self);

    /// Writes the buffer address for the next frame received into this slot.
    fn set_buffer(&mut self, addr: DmaAddress);

    /// Hands the descriptor to hardware. See [`TxDescriptor::publish`].
    fn publish(&mut self, parity: bool);

    /// True once hardware has written a frame (or an error) back.
    fn is_complete(&self, parity: bool) -> bool;

    /// Decodes the write-back words. Only meaningful once
    /// [`is_complete`](Self::is_complete) returns true.
    fn completion(&self) -> CompletionRecord;
}
