//! The `parity` codec: 16-byte descriptors whose ownership handshake is a
//! wrap-generation bit rather than a status byte. Software stamps each slot
//! with the ring's current generation when publishing; hardware echoes the
//! generation into the write-back word, so a slot is complete exactly when
//! the echoed generation matches the one software posted.

use volatile::Volatile;
use bit_field::BitField;
use core::fmt;

use crate::{CompletionRecord, DmaAddress, RxDescriptor, TxDescriptor, TxOffload, TxSlotFlags};

// Control word bits (software-written).
const CTRL_LEN_RANGE: core::ops::Range<usize> = 0..14;
const CTRL_SOP: usize = 16;
const CTRL_EOP: usize = 17;
const CTRL_IRQ: usize = 18;
const CTRL_CTX: usize = 19;
const CTRL_OWN: usize = 30;
const CTRL_GEN: usize = 31;

// Write-back word bits (hardware-written).
const WB_LEN_RANGE: core::ops::Range<usize> = 0..14;
const WB_EOP: usize = 15;
const WB_ERR: usize = 16;
const WB_CSUM_OK: usize = 17;
const WB_DONE: usize = 30;
const WB_GEN: usize = 31;

/// A `parity`-family transmit descriptor.
#[repr(C)]
pub struct ParityTxDesc {
    /// Low half of the fragment's bus address.
    buf_lo: Volatile<u32>,
    /// High half of the fragment's bus address.
    buf_hi: Volatile<u32>,
    /// Length, slot flags, ownership, and generation.
    ctrl:   Volatile<u32>,
    /// Completion word written back by hardware.
    wb:     Volatile<u32>,
}

const_assert_eq!(core::mem::size_of::<ParityTxDesc>(), 16);

impl Default for ParityTxDesc {
    fn default() -> Self {
        ParityTxDesc {
            buf_lo: Volatile::new(0),
            buf_hi: Volatile::new(0),
            ctrl:   Volatile::new(0),
            wb:     Volatile::new(0),
        }
    }
}

impl TxDescriptor for ParityTxDesc {
    fn init(&mut self) {
        self.buf_lo.write(0);
        self.buf_hi.write(0);
        self.ctrl.write(0);
        self.wb.write(0);
    }

    fn write_context(&mut self, offload: &TxOffload) {
        // The buffer words carry the packed context parameters.
        let mut lo: u32 = 0;
        if let Some(mss) = offload.segment_size {
            lo.set_bits(0..16, mss as u32);
        }
        if let Some(tag) = offload.vlan_tag {
            lo.set_bits(16..32, tag as u32);
        }
        self.buf_lo.write(lo);
        let mut hi: u32 = 0;
        hi.set_bits(0..8, offload.checksum_start as u32);
        hi.set_bits(8..16, offload.checksum_offset as u32);
        hi.set_bit(16, offload.insert_checksum);
        hi.set_bit(17, offload.timestamp);
        self.buf_hi.write(hi);
        let mut ctrl: u32 = 0;
        ctrl.set_bit(CTRL_CTX, true);
        self.ctrl.write(ctrl);
        self.wb.write(0);
    }

    fn write_fragment(&mut self, addr: DmaAddress, len: u16, flags: TxSlotFlags) {
        self.buf_lo.write(addr.value() as u32);
        self.buf_hi.write((addr.value() >> 32) as u32);
        let mut ctrl: u32 = 0;
        ctrl.set_bits(CTRL_LEN_RANGE, len as u32);
        ctrl.set_bit(CTRL_SOP, flags.contains(TxSlotFlags::START_OF_PACKET));
        ctrl.set_bit(CTRL_EOP, flags.contains(TxSlotFlags::END_OF_PACKET));
        ctrl.set_bit(CTRL_IRQ, flags.contains(TxSlotFlags::REQUEST_IRQ));
        self.ctrl.write(ctrl);
        self.wb.write(0);
    }

    fn publish(&mut self, parity: bool) {
        let mut ctrl = self.ctrl.read();
        ctrl.set_bit(CTRL_OWN, true);
        ctrl.set_bit(CTRL_GEN, parity);
        self.ctrl.write(ctrl);
    }

    fn is_done(&self, parity: bool) -> bool {
        let wb = self.wb.read();
        wb.get_bit(WB_DONE) && wb.get_bit(WB_GEN) == parity
    }
}

impl ParityTxDesc {
    /// Hardware-side write-back for software device models: echoes the
    /// generation the slot was posted with.
    pub fn write_back(&mut self) {
        let ctrl = self.ctrl.read();
        let mut wb: u32 = 0;
        wb.set_bit(WB_DONE, true);
        wb.set_bit(WB_GEN, ctrl.get_bit(CTRL_GEN));
        self.wb.write(wb);
    }
}

impl fmt::Debug for ParityTxDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{buf: {:#X}, ctrl: {:#010X}, wb: {:#010X}}}",
            ((self.buf_hi.read() as u64) << 32) | self.buf_lo.read() as u64,
            self.ctrl.read(), self.wb.read())
    }
}


/// A `parity`-family receive descriptor.
#[repr(C)]
pub struct ParityRxDesc {
    /// Low half of the buffer's bus address.
    buf_lo: Volatile<u32>,
    /// High half of the buffer's bus address.
    buf_hi: Volatile<u32>,
    /// Length, frame flags, and generation echo, written back by hardware.
    wb0:    Volatile<u32>,
    /// Receive-side-scaling hash, written back by hardware.
    wb1:    Volatile<u32>,
}

const_assert_eq!(core::mem::size_of::<ParityRxDesc>(), 16);

impl Default for ParityRxDesc {
    fn default() -> Self {
        ParityRxDesc {
            buf_lo: Volatile::new(0),
            buf_hi: Volatile::new(0),
            wb0:    Volatile::new(0),
            wb1:    Volatile::new(0),
        }
    }
}

impl ParityRxDesc {
    /// The generation a slot was posted with is remembered in the top bit
    /// of the high address word; hardware copies it into the write-back.
    fn posted_parity(&self) -> bool {
        self.buf_hi.read().get_bit(31)
    }
}

impl RxDescriptor for ParityRxDesc {
    fn init(&mut self) {
        self.buf_lo.write(0);
        self.buf_hi.write(0);
        self.wb0.write(0);
        self.wb1.write(0);
    }

    fn set_buffer(&mut self, addr: DmaAddress) {
        self.buf_lo.write(addr.value() as u32);
        // Bus addresses in this family fit 63 bits; bit 31 of the high word
        // holds the posted generation.
        let mut hi = ((addr.value() >> 32) as u32) & 0x7FFF_FFFF;
        hi.set_bit(31, self.posted_parity());
        self.buf_hi.write(hi);
    }

    fn publish(&mut self, parity: bool) {
        let mut hi = self.buf_hi.read();
        hi.set_bit(31, parity);
        self.buf_hi.write(hi);
        self.wb0.write(0);
        self.wb1.write(0);
    }

    fn is_complete(&self, parity: bool) -> bool {
        let wb0 = self.wb0.read();
        wb0.get_bit(WB_DONE) && wb0.get_bit(WB_GEN) == parity
    }

    fn completion(&self) -> CompletionRecord {
        let wb0 = self.wb0.read();
        CompletionRecord {
            length: wb0.get_bits(WB_LEN_RANGE) as u16,
            end_of_packet: wb0.get_bit(WB_EOP),
            error: wb0.get_bit(WB_ERR),
            checksum_ok: !wb0.get_bit(WB_ERR) && wb0.get_bit(WB_CSUM_OK),
            vlan_tag: None,
            rss_hash: Some(self.wb1.read()),
        }
    }
}

impl ParityRxDesc {
    /// Returns the posted buffer address (with the generation bit masked).
    pub fn buffer_addr(&self) -> DmaAddress {
        let hi = (self.buf_hi.read() & 0x7FFF_FFFF) as u64;
        DmaAddress((hi << 32) | self.buf_lo.read() as u64)
    }

    /// Hardware-side write-back for software device models.
    pub fn write_back(&mut self, len: u16, end_of_packet: bool, checksum_ok: bool, error: bool, hash: u32) {
        let mut wb0: u32 = 0;
        wb0.set_bits(WB_LEN_RANGE, len as u32);
        wb0.set_bit(WB_EOP, end_of_packet);
        wb0.set_bit(WB_ERR, error);
        wb0.set_bit(WB_CSUM_OK, checksum_ok);
        wb0.set_bit(WB_DONE, true);
        wb0.set_bit(WB_GEN, self.posted_parity());
        self.wb0.write(wb0);
        self.wb1.write(hash);
    }
}

impl fmt::Debug for ParityRxDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{buf: {:#X}, wb0: {:#010X}, wb1: {:#010X}}}",
            self.buffer_addr().value(), self.wb0.read(), self.wb1.read())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_generation_gates_completion() {
        let mut desc = ParityTxDesc::default();
        desc.write_fragment(DmaAddress(0x5000), 128, TxSlotFlags::END_OF_PACKET);
        desc.publish(true);
        assert!(!desc.is_done(true));

        desc.write_back();
        assert!(desc.is_done(true));
        // A stale write-back from the previous lap must not read as done.
        assert!(!desc.is_done(false));
    }

    #[test]
    fn tx_context_is_flagged() {
        let mut desc = ParityTxDesc::default();
        desc.write_context(&TxOffload {
            segment_size: Some(9000),
            ..Default::default()
        });
        assert!(desc.ctrl.read().get_bit(CTRL_CTX));
        assert_eq!(desc.buf_lo.read().get_bits(0..16), 9000);
    }

    #[test]
    fn rx_round_trip_with_hash() {
        let mut desc = ParityRxDesc::default();
        desc.set_buffer(DmaAddress(0x1_2345_6000));
        desc.publish(false);
        assert_eq!(desc.buffer_addr(), DmaAddress(0x1_2345_6000));
        assert!(!desc.is_complete(false));

        desc.write_back(900, true, true, false, 0xDEAD_BEEF);
        assert!(desc.is_complete(false));
        assert!(!desc.is_complete(true));
        let rec = desc.completion();
        assert_eq!(rec.length, 900);
        assert!(rec.end_of_packet);
        assert!(rec.checksum_ok);
        assert_eq!(rec.rss_hash, Some(0xDEAD_BEEF));
    }

    #[test]
    fn rx_parity_survives_rebuffer() {
        let mut desc = ParityRxDesc::default();
        desc.publish(true);
        desc.set_buffer(DmaAddress(0x8000));
        assert!(desc.posted_parity());
        assert_eq!(desc.buffer_addr(), DmaAddress(0x8000));
    }
}
