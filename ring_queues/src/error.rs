//! The fault taxonomy of the ring engine.

use core::fmt;

/// Everything that can go wrong at the queue interface.
///
/// Per-packet faults (`MappingFailed`, `EmptyPacket`, `TooFragmented`)
/// affect only the packet they were returned for; the ring keeps running.
/// `RingCorrupt` and `HardwareTimeout` mean the ring can no longer be
/// trusted and the queue should be closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A bounded resource (buffer pool, metadata arena) ran dry.
    ResourceExhausted,
    /// The platform refused to bus-map a region.
    MappingFailed,
    /// The device did not quiesce within its deadline.
    HardwareTimeout,
    /// Checksum, CRC, or length error on a completed receive slot. Never
    /// carried in a `Result`: the frame is dropped and counted in
    /// `RxPollSummary::errors`, and the ring keeps running.
    DataError,
    /// A submission carried no fragments.
    EmptyPacket,
    /// The software indices and the hardware completion counter disagree.
    RingCorrupt,
    /// The packet needs more descriptors than the per-packet maximum.
    TooFragmented,
    /// The requested ring depth is not a supported power of two.
    InvalidDepth,
    /// The queue configuration is internally inconsistent.
    InvalidConfig,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Error::ResourceExhausted => "a bounded resource was exhausted",
            Error::MappingFailed => "bus mapping failed",
            Error::HardwareTimeout => "the device did not respond in time",
            Error::DataError => "hardware flagged the frame data as bad",
            Error::EmptyPacket => "the packet had no fragments",
            Error::RingCorrupt => "ring indices and hardware state disagree",
            Error::TooFragmented => "the packet exceeds the descriptor-per-packet limit",
            Error::InvalidDepth => "unsupported ring depth",
            Error::InvalidConfig => "inconsistent queue configuration",
        };
        write!(f, "{}", msg)
    }
}
