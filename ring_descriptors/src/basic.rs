//! The `basic` codec: 16-byte descriptors with a status byte that hardware
//! writes back when it finishes a slot. Controllers in this family signal
//! ownership with a command bit and completion with a "descriptor done"
//! status bit, so the ring's wrap parity is ignored.

use volatile::Volatile;
use bit_field::BitField;
use core::fmt;

use crate::{CompletionRecord, DmaAddress, RxDescriptor, TxDescriptor, TxOffload, TxSlotFlags};

/// Tx Command: End of Packet
pub const TX_CMD_EOP: u8 = 1 << 0;
/// Tx Command: Start of Packet
pub const TX_CMD_SOP: u8 = 1 << 1;
/// Tx Command: Report completion with an interrupt
pub const TX_CMD_IRQ: u8 = 1 << 2;
/// Tx Command: this slot is a context descriptor
pub const TX_CMD_CTX: u8 = 1 << 3;
/// Tx Command: insert a VLAN tag from the context
pub const TX_CMD_VLE: u8 = 1 << 4;
/// Tx Command: segment the packet using the context's segment size
pub const TX_CMD_TSE: u8 = 1 << 5;
/// Tx Command: the slot belongs to hardware
pub const TX_CMD_OWN: u8 = 1 << 7;
/// Tx Status: descriptor done
pub const TX_STATUS_DD: u8 = 1 << 0;

/// Rx Status: descriptor done
pub const RX_STATUS_DD: u8 = 1 << 0;
/// Rx Status: end of packet
pub const RX_STATUS_EOP: u8 = 1 << 1;
/// Rx Status: checksums validated
pub const RX_STATUS_CSUM_OK: u8 = 1 << 2;
/// Rx Status: a VLAN tag was stripped into the vlan field
pub const RX_STATUS_VLAN: u8 = 1 << 3;

/// A `basic`-family transmit descriptor.
/// There is one instance of this struct per ring slot.
#[repr(C)]
pub struct BasicTxDesc {
    /// Starting bus address of the fragment, or packed context parameters.
    addr:   Volatile<u64>,
    /// Length of the fragment in bytes.
    len:    Volatile<u16>,
    /// Checksum start: where to begin computing the checksum, if enabled.
    cso:    Volatile<u8>,
    /// Command bits, including ownership.
    cmd:    Volatile<u8>,
    /// Status bits written back by hardware.
    status: Volatile<u8>,
    /// Checksum offset: where to insert the checksum, if enabled.
    css:    Volatile<u8>,
    /// VLAN tag to insert, if TX_CMD_VLE is set in the context.
    vlan:   Volatile<u16>,
}

const_assert_eq!(core::mem::size_of::<BasicTxDesc>(), 16);

impl Default for BasicTxDesc {
    fn default() -> Self {
        BasicTxDesc {
            addr:   Volatile::new(0),
            len:    Volatile::new(0),
            cso:    Volatile::new(0),
            cmd:    Volatile::new(0),
            status: Volatile::new(0),
            css:    Volatile::new(0),
            vlan:   Volatile::new(0),
        }
    }
}

impl TxDescriptor for BasicTxDesc {
    fn init(&mut self) {
        self.addr.write(0);
        self.len.write(0);
        self.cso.write(0);
        self.cmd.write(0);
        self.status.write(0);
        self.css.write(0);
        self.vlan.write(0);
    }

    fn write_context(&mut self, offload: &TxOffload) {
        // Context descriptors carry no buffer; the address field packs the
        // packet-wide parameters instead.
        let mut packed: u64 = 0;
        if let Some(mss) = offload.segment_size {
            packed.set_bits(0..16, mss as u64);
            packed.set_bit(32, true);
        }
        if offload.timestamp {
            packed.set_bit(33, true);
        }
        self.addr.write(packed);
        self.len.write(0);
        self.cso.write(offload.checksum_start);
        self.css.write(offload.checksum_offset);
        self.vlan.write(offload.vlan_tag.unwrap_or(0));
        let mut cmd = TX_CMD_CTX;
        if offload.vlan_tag.is_some() {
            cmd |= TX_CMD_VLE;
        }
        if offload.segment_size.is_some() {
            cmd |= TX_CMD_TSE;
        }
        self.cmd.write(cmd);
        self.status.write(0);
    }

    fn write_fragment(&mut self, addr: DmaAddress, len: u16, flags: TxSlotFlags) {
        self.addr.write(addr.value());
        self.len.write(len);
        self.cso.write(0);
        self.css.write(0);
        self.vlan.write(0);
        let mut cmd = 0;
        if flags.contains(TxSlotFlags::START_OF_PACKET) {
            cmd |= TX_CMD_SOP;
        }
        if flags.contains(TxSlotFlags::END_OF_PACKET) {
            cmd |= TX_CMD_EOP;
        }
        if flags.contains(TxSlotFlags::REQUEST_IRQ) {
            cmd |= TX_CMD_IRQ;
        }
        self.cmd.write(cmd);
        self.status.write(0);
    }

    fn publish(&mut self, _parity: bool) {
        self.cmd.write(self.cmd.read() | TX_CMD_OWN);
    }

    fn is_done(&self, _parity: bool) -> bool {
        (self.status.read() & TX_STATUS_DD) == TX_STATUS_DD
    }
}

impl BasicTxDesc {
    /// Returns the raw command bits. Used by device models to decide how to
    /// process a slot.
    pub fn command(&self) -> u8 {
        self.cmd.read()
    }

    /// Hardware-side write-back: marks the slot consumed. Used by software
    /// device models; real hardware does this by DMA.
    pub fn write_back(&mut self) {
        self.cmd.write(self.cmd.read() & !TX_CMD_OWN);
        self.status.write(TX_STATUS_DD);
    }
}

impl fmt::Debug for BasicTxDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{addr: {:#X}, len: {}, cmd: {:#04X}, status: {:#04X}}}",
            self.addr.read(), self.len.read(), self.cmd.read(), self.status.read())
    }
}


/// A `basic`-family receive descriptor.
/// Software writes the buffer address and clears the status byte; hardware
/// writes the frame length, checksum verdict, and status back.
#[repr(C)]
pub struct BasicRxDesc {
    /// Starting bus address of the receive buffer.
    addr:   Volatile<u64>,
    /// Length of the received frame, written back by hardware.
    len:    Volatile<u16>,
    /// Packet checksum, written back by hardware.
    csum:   Volatile<u16>,
    /// Status bits written back by hardware.
    status: Volatile<u8>,
    /// Error bits written back by hardware; nonzero means drop the frame.
    errors: Volatile<u8>,
    /// Stripped VLAN tag, valid when RX_STATUS_VLAN is set.
    vlan:   Volatile<u16>,
}

const_assert_eq!(core::mem::size_of::<BasicRxDesc>(), 16);

impl Default for BasicRxDesc {
    fn default() -> Self {
        BasicRxDesc {
            addr:   Volatile::new(0),
            len:    Volatile::new(0),
            csum:   Volatile::new(0),
            status: Volatile::new(0),
            errors: Volatile::new(0),
            vlan:   Volatile::new(0),
        }
    }
}

impl RxDescriptor for BasicRxDesc {
    fn init(&mut self) {
        self.addr.write(0);
        self.len.write(0);
        self.csum.write(0);
        self.status.write(0);
        self.errors.write(0);
        self.vlan.write(0);
    }

    fn set_buffer(&mut self, addr: DmaAddress) {
        self.addr.write(addr.value());
    }

    fn publish(&mut self, _parity: bool) {
        // Clearing the status byte is what returns the slot to hardware in
        // this family.
        self.len.write(0);
        self.errors.write(0);
        self.status.write(0);
    }

    fn is_complete(&self, _parity: bool) -> bool {
        (self.status.read() & RX_STATUS_DD) == RX_STATUS_DD
    }

    fn completion(&self) -> CompletionRecord {
        let status = self.status.read();
        let errors = self.errors.read();
        CompletionRecord {
            length: self.len.read(),
            end_of_packet: (status & RX_STATUS_EOP) == RX_STATUS_EOP,
            error: errors != 0,
            checksum_ok: errors == 0 && (status & RX_STATUS_CSUM_OK) == RX_STATUS_CSUM_OK,
            vlan_tag: if (status & RX_STATUS_VLAN) == RX_STATUS_VLAN {
                Some(self.vlan.read())
            } else {
                None
            },
            rss_hash: None,
        }
    }
}

impl BasicRxDesc {
    /// Returns the posted buffer address. Used by device models to locate
    /// the buffer they should fill.
    pub fn buffer_addr(&self) -> DmaAddress {
        DmaAddress(self.addr.read())
    }

    /// Hardware-side write-back for software device models.
    pub fn write_back(&mut self, len: u16, end_of_packet: bool, checksum_ok: bool, errors: u8) {
        self.len.write(len);
        self.errors.write(errors);
        let mut status = RX_STATUS_DD;
        if end_of_packet {
            status |= RX_STATUS_EOP;
        }
        if checksum_ok {
            status |= RX_STATUS_CSUM_OK;
        }
        self.status.write(status);
    }
}

impl fmt::Debug for BasicRxDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{addr: {:#X}, len: {}, status: {:#04X}, errors: {:#04X}}}",
            self.addr.read(), self.len.read(), self.status.read(), self.errors.read())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_fragment_round_trip() {
        let mut desc = BasicTxDesc::default();
        desc.write_fragment(
            DmaAddress(0x1000),
            64,
            TxSlotFlags::START_OF_PACKET | TxSlotFlags::END_OF_PACKET | TxSlotFlags::REQUEST_IRQ,
        );
        assert_eq!(desc.command() & TX_CMD_OWN, 0);
        assert!(!desc.is_done(false));

        desc.publish(false);
        assert_eq!(desc.command() & TX_CMD_OWN, TX_CMD_OWN);
        assert_eq!(desc.command() & TX_CMD_SOP, TX_CMD_SOP);
        assert_eq!(desc.command() & TX_CMD_EOP, TX_CMD_EOP);
        assert_eq!(desc.command() & TX_CMD_IRQ, TX_CMD_IRQ);

        desc.write_back();
        assert!(desc.is_done(false));
        assert_eq!(desc.command() & TX_CMD_OWN, 0);
    }

    #[test]
    fn tx_context_encodes_offloads() {
        let mut desc = BasicTxDesc::default();
        let offload = TxOffload {
            insert_checksum: true,
            checksum_start: 14,
            checksum_offset: 16,
            segment_size: Some(1448),
            vlan_tag: Some(100),
            timestamp: false,
        };
        desc.write_context(&offload);
        let cmd = desc.command();
        assert_eq!(cmd & TX_CMD_CTX, TX_CMD_CTX);
        assert_eq!(cmd & TX_CMD_VLE, TX_CMD_VLE);
        assert_eq!(cmd & TX_CMD_TSE, TX_CMD_TSE);
        assert_eq!(desc.addr.read().get_bits(0..16), 1448);
        assert_eq!(desc.vlan.read(), 100);
        assert_eq!(desc.cso.read(), 14);
        assert_eq!(desc.css.read(), 16);
    }

    #[test]
    fn rx_write_back_decodes() {
        let mut desc = BasicRxDesc::default();
        desc.set_buffer(DmaAddress(0x2000));
        desc.publish(false);
        assert!(!desc.is_complete(false));
        assert_eq!(desc.buffer_addr(), DmaAddress(0x2000));

        desc.write_back(1500, true, true, 0);
        assert!(desc.is_complete(false));
        let rec = desc.completion();
        assert_eq!(rec.length, 1500);
        assert!(rec.end_of_packet);
        assert!(rec.checksum_ok);
        assert!(!rec.error);
        assert_eq!(rec.vlan_tag, None);
    }

    #[test]
    fn rx_error_write_back() {
        let mut desc = BasicRxDesc::default();
        desc.set_buffer(DmaAddress(0x3000));
        desc.publish(false);
        desc.write_back(64, true, false, 0x4);
        let rec = desc.completion();
        assert!(rec.error);
        assert!(!rec.checksum_ok);
    }

    #[test]
    fn rx_republish_clears_write_back() {
        let mut desc = BasicRxDesc::default();
        desc.set_buffer(DmaAddress(0x4000));
        desc.publish(false);
        desc.write_back(200, true, true, 0);
        assert!(desc.is_complete(false));

        desc.publish(false);
        assert!(!desc.is_complete(false));
        assert_eq!(desc.buffer_addr(), DmaAddress(0x4000));
    }
}
