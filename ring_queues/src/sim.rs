//! Software device models and a recording client for the queue tests.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use ring_descriptors::DmaAddress;
use ring_device::{CoalesceConfig, DmaMapper, RxRingHardware, TxRingHardware};

use crate::rx::RxPacket;
use crate::{PacketHandle, QueueId, RingClient};

/// A transmit ring register block. Tests set `completed` to play the
/// hardware's free-running completion counter.
#[derive(Default)]
pub(crate) struct SimTxHardware {
    pub completed: u16,
    pub doorbells: Vec<u16>,
    pub masked: bool,
    pub unmask_count: usize,
    pub configured: Option<(u64, u32)>,
    pub coalesce: CoalesceConfig,
    pub running: bool,
    pub starts: usize,
    pub fail_stop: bool,
}

impl TxRingHardware for SimTxHardware {
    fn configure(&mut self, base: DmaAddress, len_bytes: u32) {
        self.configured = Some((base.value(), len_bytes));
    }

    fn start(&mut self) {
        self.running = true;
        self.starts += 1;
    }

    fn stop(&mut self) -> Result<(), &'static str> {
        if self.fail_stop {
            return Err("simulated stop timeout");
        }
        self.running = false;
        Ok(())
    }

    fn doorbell(&mut self, produce_counter: u16) {
        self.doorbells.push(produce_counter);
    }

    fn read_completed_count(&self) -> u16 {
        self.completed
    }

    fn mask_interrupt(&mut self) {
        self.masked = true;
    }

    fn unmask_interrupt(&mut self) {
        self.masked = false;
        self.unmask_count += 1;
    }

    fn set_coalesce(&mut self, config: CoalesceConfig) {
        self.coalesce = config;
    }
}

/// A receive ring register block.
#[derive(Default)]
pub(crate) struct SimRxHardware {
    pub doorbells: Vec<u16>,
    pub masked: bool,
    pub unmask_count: usize,
    pub configured: Option<(u64, u32)>,
    pub coalesce: CoalesceConfig,
    pub running: bool,
    pub starts: usize,
    pub fail_stop: bool,
}

impl RxRingHardware for SimRxHardware {
    fn configure(&mut self, base: DmaAddress, len_bytes: u32) {
        self.configured = Some((base.value(), len_bytes));
    }

    fn start(&mut self) {
        self.running = true;
        self.starts += 1;
    }

    fn stop(&mut self) -> Result<(), &'static str> {
        if self.fail_stop {
            return Err("simulated stop timeout");
        }
        self.running = false;
        Ok(())
    }

    fn doorbell(&mut self, produce_counter: u16) {
        self.doorbells.push(produce_counter);
    }

    fn mask_interrupt(&mut self) {
        self.masked = true;
    }

    fn unmask_interrupt(&mut self) {
        self.masked = false;
        self.unmask_count += 1;
    }

    fn set_coalesce(&mut self, config: CoalesceConfig) {
        self.coalesce = config;
    }
}

/// Everything a [`SimMapper`] did, shared out so tests can inspect it after
/// the queue has consumed the mapper.
#[derive(Default)]
pub(crate) struct MapLog {
    pub maps: Vec<(usize, usize)>,
    pub unmaps: Vec<(u64, usize)>,
    /// Fail every map once this many have succeeded (in total).
    pub fail_after: Option<usize>,
}

pub(crate) struct SimMapper {
    log: Rc<RefCell<MapLog>>,
}

impl SimMapper {
    pub fn new() -> (SimMapper, Rc<RefCell<MapLog>>) {
        let log = Rc::new(RefCell::new(MapLog::default()));
        (SimMapper { log: Rc::clone(&log) }, log)
    }
}

impl DmaMapper for SimMapper {
    fn map(&self, addr: usize, len: usize) -> Result<DmaAddress, &'static str> {
        let mut log = self.log.borrow_mut();
        if let Some(limit) = log.fail_after {
            if log.maps.len() >= limit {
                return Err("simulated mapping failure");
            }
        }
        log.maps.push((addr, len));
        Ok(DmaAddress(addr as u64))
    }

    fn unmap(&self, addr: DmaAddress, len: usize) {
        self.log.borrow_mut().unmaps.push((addr.value(), len));
    }
}

/// Records every upward event.
#[derive(Default)]
pub(crate) struct SimClient {
    pub rx: Vec<RxPacket>,
    pub transmitted: Vec<(PacketHandle, usize)>,
    pub stopped: Vec<QueueId>,
    pub resumed: Vec<QueueId>,
}

impl RingClient for SimClient {
    fn deliver_rx_packet(&mut self, _queue: QueueId, packet: RxPacket) {
        self.rx.push(packet);
    }

    fn packet_transmitted(&mut self, _queue: QueueId, handle: PacketHandle, bytes: usize) {
        self.transmitted.push((handle, bytes));
    }

    fn queue_stopped(&mut self, queue: QueueId) {
        self.stopped.push(queue);
    }

    fn queue_resumed(&mut self, queue: QueueId) {
        self.resumed.push(queue);
    }
}
