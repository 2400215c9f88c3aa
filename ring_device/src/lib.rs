//! The seam between the ring engine and a concrete controller.
//!
//! The engine never touches registers directly. Each vendor driver hands it
//! an implementation of [`TxRingHardware`] / [`RxRingHardware`] wrapping that
//! controller's register block, plus a [`DmaMapper`] for the platform's bus
//! mapping service. Everything above this crate is vendor-neutral.

#![cfg_attr(not(test), no_std)]

use ring_descriptors::DmaAddress;

/// Interrupt moderation parameters for one ring.
///
/// `usecs == 0 && frames == 0` disables coalescing entirely: every completed
/// descriptor raises an interrupt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoalesceConfig {
    /// Delay an interrupt by up to this many microseconds.
    pub usecs: u32,
    /// Or until this many frames have completed, whichever comes first.
    pub frames: u32,
}

impl CoalesceConfig {
    /// True if every completion should raise its own interrupt.
    pub fn per_descriptor(&self) -> bool {
        self.usecs == 0 && self.frames == 0
    }
}

/// Register operations the transmit path needs from a controller.
///
/// Implementations wrap one queue's slice of the register block, the same
/// way each vendor module wraps its own descriptor layout.
pub trait TxRingHardware {
    /// Programs the ring's base bus address and byte length.
    fn configure(&mut self, base: DmaAddress, len_bytes: u32);

    /// Enables the ring's DMA engine.
    fn start(&mut self);

    /// Disables the ring's DMA engine, waiting for in-flight descriptor
    /// fetches to drain. Errors if the engine does not quiesce in time.
    fn stop(&mut self) -> Result<(), &'static str>;

    /// Tells hardware that descriptors up to (but not including) the given
    /// free-running producer counter are ready to fetch.
    ///
    /// Callers must order all descriptor writes before this with a release
    /// barrier; the doorbell itself is just a register write.
    fn doorbell(&mut self, produce_counter: u16);

    /// Reads the free-running count of descriptors hardware has finished
    /// with. Wraps at 65536 like the software counters it is compared to.
    fn read_completed_count(&self) -> u16;

    /// Suppresses this ring's completion interrupt.
    fn mask_interrupt(&mut self);

    /// Re-enables this ring's completion interrupt.
    fn unmask_interrupt(&mut self);

    /// Programs interrupt moderation for this ring.
    fn set_coalesce(&mut self, config: CoalesceConfig);
}

/// Register operations the receive path needs from a controller.
pub trait RxRingHardware {
    /// Programs the ring's base bus address and byte length.
    fn configure(&mut self, base: DmaAddress, len_bytes: u32);

    /// Enables the ring's DMA engine.
    fn start(&mut self);

    /// Disables the ring's DMA engine. Errors if it does not quiesce.
    fn stop(&mut self) -> Result<(), &'static str>;

    /// Tells hardware that empty buffers have been posted up to (but not
    /// including) the given free-running producer counter.
    fn doorbell(&mut self, produce_counter: u16);

    /// Suppresses this ring's receive interrupt.
    fn mask_interrupt(&mut self);

    /// Re-enables this ring's receive interrupt.
    fn unmask_interrupt(&mut self);

    /// Programs interrupt moderation for this ring.
    fn set_coalesce(&mut self, config: CoalesceConfig);
}

/// The platform's bus mapping service.
///
/// Mapping pins a host memory region for device access and yields the bus
/// address to encode into descriptors; every successful map must be paired
/// with exactly one unmap once hardware is done with the region. Used for
/// descriptor arrays, pool buffers, and per-fragment packet mappings alike.
pub trait DmaMapper {
    /// Maps `len` bytes at host address `addr` for device access.
    fn map(&self, addr: usize, len: usize) -> Result<DmaAddress, &'static str>;

    /// Releases a mapping previously returned by [`map`](Self::map).
    fn unmap(&self, addr: DmaAddress, len: usize);
}
