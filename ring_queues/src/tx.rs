//! The transmit queue: submission and completion reaping.
//!
//! Submission encodes a fragment list (plus an optional leading context
//! descriptor for packet-wide offloads) into a contiguous descriptor run,
//! publishes the run behind a release barrier, and rings the doorbell.
//! Reaping trusts the hardware's free-running completed-descriptor counter
//! rather than scanning per-descriptor status, and retires packets only
//! whole: a run is either fully reclaimed or untouched.

use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use ring_descriptors::{DmaAddress, Fragment, TxDescriptor, TxOffload, TxSlotFlags};
use ring_device::{CoalesceConfig, DmaMapper, TxRingHardware};
use ring_slots::{RingSlotTable, SlotArena};

use crate::backpressure::QueueBackpressure;
use crate::moderation::InterruptModerator;
use crate::{Error, PacketHandle, PollOutcome, QueueId, RingClient, RingConfig};

/// Outcome of a submission attempt. `WouldBlock` is ordinary flow control:
/// the ring is too full for this packet right now, try again after a
/// `queue_resumed` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued { descriptors: u16 },
    WouldBlock,
}

/// What one reap pass retired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReapSummary {
    pub packets: usize,
    pub bytes: usize,
    pub outcome: PollOutcome,
}

/// Reclaim state for one in-flight packet, stored at the run's first slot.
struct TxPacketMeta {
    handle: PacketHandle,
    span: u16,
    bytes: usize,
    mappings: Vec<(DmaAddress, u16)>,
}

pub struct TxQueue<D: TxDescriptor, H: TxRingHardware, M: DmaMapper> {
    id: QueueId,
    config: RingConfig,
    ring: RingSlotTable<D>,
    meta: SlotArena<TxPacketMeta>,
    hw: H,
    mapper: M,
    backpressure: QueueBackpressure,
    moderator: InterruptModerator,
    ring_base: DmaAddress,
}

impl<D, H, M> TxQueue<D, H, M>
where
    D: TxDescriptor,
    H: TxRingHardware,
    M: DmaMapper,
{
    /// Allocates and maps the descriptor ring, programs the device, and
    /// starts its DMA engine.
    pub fn open(
        id: QueueId,
        config: RingConfig,
        coalesce: CoalesceConfig,
        mut hw: H,
        mapper: M,
    ) -> Result<TxQueue<D, H, M>, Error> {
        config.validate()?;
        let ring = RingSlotTable::with_depth(config.depth).map_err(|_| Error::InvalidDepth)?;
        let ring_base = mapper
            .map(ring.base_host_addr(), ring.len_bytes() as usize)
            .map_err(|e| {
                error!("TX queue {}: descriptor ring mapping failed: {}", id, e);
                Error::MappingFailed
            })?;
        let backpressure =
            QueueBackpressure::new(config.worst_case_descriptors, config.resume_threshold)?;
        hw.configure(ring_base, ring.len_bytes());
        hw.set_coalesce(coalesce);
        hw.start();
        debug!("TX queue {}: open, depth {}", id, config.depth);
        Ok(TxQueue {
            id,
            meta: SlotArena::with_capacity(config.depth),
            config,
            ring,
            hw,
            mapper,
            backpressure,
            moderator: InterruptModerator::new(coalesce),
            ring_base,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.backpressure.is_stopped()
    }

    pub fn available_for_submit(&self) -> u16 {
        self.ring.available_for_submit()
    }

    pub fn next_to_use(&self) -> u16 {
        self.ring.next_to_use()
    }

    pub fn next_to_clean(&self) -> u16 {
        self.ring.next_to_clean()
    }

    /// Queues one packet.
    ///
    /// Maps every fragment, encodes an optional context descriptor followed
    /// by one descriptor per fragment, publishes the run, and rings the
    /// doorbell. A mapping failure part-way through unmaps everything
    /// already mapped for this packet and leaves the ring untouched.
    pub fn submit(
        &mut self,
        client: &mut dyn RingClient,
        handle: PacketHandle,
        frags: &[Fragment],
        offload: Option<&TxOffload>,
    ) -> Result<SubmitOutcome, Error> {
        if frags.is_empty() {
            return Err(Error::EmptyPacket);
        }
        let context = offload.map_or(false, |o| o.requires_context());
        let span = frags.len() + usize::from(context);
        if frags.len() > self.config.max_frags_per_packet as usize {
            return Err(Error::TooFragmented);
        }
        let span = span as u16;
        if self.backpressure.is_stopped() || span > self.ring.available_for_submit() {
            return Ok(SubmitOutcome::WouldBlock);
        }

        let mut mappings: Vec<(DmaAddress, u16)> = Vec::with_capacity(frags.len());
        for frag in frags {
            match self.mapper.map(frag.addr, frag.len as usize) {
                Ok(bus) => mappings.push((bus, frag.len)),
                Err(e) => {
                    warn!("TX queue {}: fragment mapping failed: {}", self.id, e);
                    for (bus, len) in mappings {
                        self.mapper.unmap(bus, len as usize);
                    }
                    return Err(Error::MappingFailed);
                }
            }
        }

        let first = self.ring.next_to_use();
        let irq = self.moderator.should_request_irq();
        let mut counter = first;
        let mut bytes = 0usize;

        if context {
            if let Some(off) = offload {
                let parity = self.ring.parity(counter);
                let desc = self.ring.producer_slot(counter).map_err(|_| Error::RingCorrupt)?;
                desc.write_context(off);
                // Not the gating slot; it may carry its ownership flag now.
                desc.publish(parity);
                counter = counter.wrapping_add(1);
            }
        }
        let last_index = mappings.len() - 1;
        for (i, (bus, len)) in mappings.iter().enumerate() {
            let mut flags = TxSlotFlags::empty();
            if i == 0 {
                flags |= TxSlotFlags::START_OF_PACKET;
            }
            let is_last = i == last_index;
            if is_last {
                flags |= TxSlotFlags::END_OF_PACKET;
                if irq {
                    flags |= TxSlotFlags::REQUEST_IRQ;
                }
            }
            let parity = self.ring.parity(counter);
            let desc = self.ring.producer_slot(counter).map_err(|_| Error::RingCorrupt)?;
            desc.write_fragment(*bus, *len, flags);
            if !is_last {
                desc.publish(parity);
            }
            bytes += *len as usize;
            counter = counter.wrapping_add(1);
        }

        // Metadata must be in place before the run becomes reapable.
        let meta_index = self.ring.index(first) as u16;
        let meta = TxPacketMeta { handle, span, bytes, mappings };
        if let Err(meta) = self.meta.claim(meta_index, meta) {
            error!("TX queue {}: metadata slot {} already occupied", self.id, meta_index);
            for (bus, len) in meta.mappings {
                self.mapper.unmap(bus, len as usize);
            }
            return Err(Error::RingCorrupt);
        }

        // Release barrier, ownership on the gating (last) slot, then the
        // doorbell. The doorbell must never overtake the barrier.
        self.ring
            .publish_run(span, |desc, parity| desc.publish(parity))
            .map_err(|_| Error::RingCorrupt)?;
        self.hw.doorbell(self.ring.next_to_use());

        if self.backpressure.after_publish(self.ring.available_for_submit()) {
            debug!(
                "TX queue {}: stopped with {} slots free",
                self.id,
                self.ring.available_for_submit()
            );
            client.queue_stopped(self.id);
        }
        Ok(SubmitOutcome::Queued { descriptors: span })
    }

    /// Retires up to `budget` completed packets.
    ///
    /// The hardware counter tells how many descriptors have retired; a
    /// packet whose run is only partially covered stays in flight, so
    /// completion is never torn across a packet.
    pub fn reap(&mut self, client: &mut dyn RingClient, budget: usize) -> Result<ReapSummary, Error> {
        let hw_count = self.hw.read_completed_count();
        // Pairs with the device's completion write; metadata reads below
        // must not be speculated above this observation.
        fence(Ordering::Acquire);
        let mut credit = hw_count.wrapping_sub(self.ring.next_to_clean());
        if credit > self.ring.outstanding() {
            error!(
                "TX queue {}: hardware retired {} descriptors with only {} outstanding",
                self.id,
                credit,
                self.ring.outstanding()
            );
            return Err(Error::RingCorrupt);
        }

        let mut packets = 0usize;
        let mut bytes = 0usize;
        let mut outcome = PollOutcome::Complete;
        while credit > 0 {
            if packets == budget {
                outcome = PollOutcome::MoreWork;
                break;
            }
            let index = self.ring.index(self.ring.next_to_clean()) as u16;
            let span = match self.meta.peek_at(index) {
                Some(meta) => meta.span,
                None => {
                    error!("TX queue {}: no metadata at consumer slot {}", self.id, index);
                    return Err(Error::RingCorrupt);
                }
            };
            if credit < span {
                break;
            }
            let meta = match self.meta.release_at(index) {
                Some(meta) => meta,
                None => return Err(Error::RingCorrupt),
            };
            for (bus, len) in &meta.mappings {
                self.mapper.unmap(*bus, *len as usize);
            }
            self.ring.advance_consumer(span).map_err(|_| Error::RingCorrupt)?;
            credit -= span;
            packets += 1;
            bytes += meta.bytes;
            client.packet_transmitted(self.id, meta.handle, meta.bytes);
        }

        // The consumer-index update must be globally visible before the
        // stop state is re-checked, or a producer that stopped between the
        // update and this check could miss its wakeup.
        fence(Ordering::SeqCst);
        if self.backpressure.after_reap(self.ring.available_for_submit()) {
            debug!(
                "TX queue {}: resumed with {} slots free",
                self.id,
                self.ring.available_for_submit()
            );
            client.queue_resumed(self.id);
        }
        Ok(ReapSummary { packets, bytes, outcome })
    }

    /// The interrupt-context entry point: mask, reap, and re-arm only if
    /// the backlog fit the budget. On `MoreWork` the source stays masked
    /// and the caller chains another pass.
    pub fn handle_interrupt(
        &mut self,
        client: &mut dyn RingClient,
        budget: usize,
    ) -> Result<ReapSummary, Error> {
        self.hw.mask_interrupt();
        self.moderator.note_masked();
        let summary = self.reap(client, budget)?;
        let Self { moderator, hw, .. } = self;
        moderator.on_poll_complete(summary.outcome, || hw.unmask_interrupt());
        Ok(summary)
    }

    /// Rebuilds the ring at a new depth, preserving the rest of the
    /// configuration. In-flight packets are dropped, not retransmitted.
    pub fn change_depth(&mut self, depth: usize) -> Result<(), Error> {
        let mut config = self.config;
        config.depth = depth;
        config.validate()?;

        self.hw.mask_interrupt();
        let stop = self.hw.stop();
        self.drain_in_flight();
        self.mapper.unmap(self.ring_base, self.ring.len_bytes() as usize);
        stop.map_err(|e| {
            error!("TX queue {}: stop timed out: {}", self.id, e);
            Error::HardwareTimeout
        })?;

        let ring = RingSlotTable::with_depth(depth).map_err(|_| Error::InvalidDepth)?;
        let ring_base = self
            .mapper
            .map(ring.base_host_addr(), ring.len_bytes() as usize)
            .map_err(|_| Error::MappingFailed)?;
        self.hw.configure(ring_base, ring.len_bytes());
        self.hw.start();
        self.hw.unmask_interrupt();
        self.meta = SlotArena::with_capacity(depth);
        self.ring = ring;
        self.ring_base = ring_base;
        self.config = config;
        self.backpressure.reset();
        debug!("TX queue {}: reopened at depth {}", self.id, depth);
        Ok(())
    }

    /// Stops DMA, drops whatever was still in flight, and releases every
    /// mapping the queue holds.
    pub fn close(mut self) -> Result<(), Error> {
        self.hw.mask_interrupt();
        let stop = self.hw.stop();
        self.drain_in_flight();
        self.mapper.unmap(self.ring_base, self.ring.len_bytes() as usize);
        stop.map_err(|e| {
            error!("TX queue {}: stop timed out: {}", self.id, e);
            Error::HardwareTimeout
        })
    }

    fn drain_in_flight(&mut self) {
        let mut dropped = 0usize;
        let Self { meta, mapper, .. } = self;
        for packet in meta.drain() {
            for (bus, len) in &packet.mappings {
                mapper.unmap(*bus, *len as usize);
            }
            dropped += 1;
        }
        if dropped > 0 {
            debug!("TX queue {}: dropped {} in-flight packets", self.id, dropped);
        }
    }

    #[cfg(test)]
    pub(crate) fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    #[cfg(test)]
    pub(crate) fn meta_mut(&mut self) -> &mut SlotArena<TxPacketMeta> {
        &mut self.meta
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MapLog, SimClient, SimMapper, SimTxHardware};
    use alloc::rc::Rc;
    use core::cell::RefCell;
    use ring_descriptors::basic::BasicTxDesc;

    type TestQueue = TxQueue<BasicTxDesc, SimTxHardware, SimMapper>;

    fn config(depth: usize) -> RingConfig {
        RingConfig {
            depth,
            max_frags_per_packet: 8,
            worst_case_descriptors: 3,
            resume_threshold: 6,
            ..RingConfig::default()
        }
    }

    fn open_queue(depth: usize) -> (TestQueue, SimClient, Rc<RefCell<MapLog>>) {
        let (mapper, log) = SimMapper::new();
        let queue = TxQueue::open(
            QueueId(0),
            config(depth),
            CoalesceConfig::default(),
            SimTxHardware::default(),
            mapper,
        )
        .unwrap();
        (queue, SimClient::default(), log)
    }

    fn frags(lens: &[u16]) -> Vec<Fragment> {
        lens.iter()
            .enumerate()
            .map(|(i, &len)| Fragment { addr: 0x1000 * (i + 1), len })
            .collect()
    }

    fn submit_spans(q: &mut TestQueue, client: &mut SimClient, spans: &[u16]) {
        for (i, &span) in spans.iter().enumerate() {
            let lens: Vec<u16> = (0..span).map(|_| 100).collect();
            let out = q.submit(client, PacketHandle(i as u64), &frags(&lens), None).unwrap();
            assert_eq!(out, SubmitOutcome::Queued { descriptors: span });
        }
    }

    #[test]
    fn three_fragments_use_three_slots() {
        let (mut q, mut client, _log) = open_queue(8);
        let out = q
            .submit(&mut client, PacketHandle(1), &frags(&[100, 200, 300]), None)
            .unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 3 });
        assert_eq!(q.next_to_use(), 3);
        assert_eq!(q.hw_mut().doorbells, [3]);
        assert!(q.hw_mut().running);
        assert!(q.hw_mut().configured.is_some());

        // 5 slots left; a 6-fragment packet no longer fits.
        let out = q
            .submit(&mut client, PacketHandle(2), &frags(&[1, 2, 3, 4, 5, 6]), None)
            .unwrap();
        assert_eq!(out, SubmitOutcome::WouldBlock);
        assert_eq!(q.next_to_use(), 3);
        assert_eq!(q.hw_mut().doorbells.len(), 1);
    }

    #[test]
    fn offload_adds_a_context_descriptor() {
        let (mut q, mut client, _log) = open_queue(8);
        let offload = TxOffload {
            insert_checksum: true,
            checksum_start: 14,
            checksum_offset: 16,
            ..Default::default()
        };
        let out = q
            .submit(&mut client, PacketHandle(7), &frags(&[64, 64]), Some(&offload))
            .unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 3 });
        assert_eq!(q.next_to_use(), 3);

        // An offload struct with nothing in it adds no slot.
        let out = q
            .submit(&mut client, PacketHandle(8), &frags(&[64]), Some(&TxOffload::default()))
            .unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 1 });
    }

    #[test]
    fn fragment_limit_is_enforced() {
        let (mut q, mut client, _log) = open_queue(32);
        let lens: Vec<u16> = (0..9).map(|_| 10).collect();
        let err = q.submit(&mut client, PacketHandle(1), &frags(&lens), None).unwrap_err();
        assert_eq!(err, Error::TooFragmented);
        assert_eq!(q.next_to_use(), 0);

        // The context slot rides on top of the fragment limit.
        let lens: Vec<u16> = (0..8).map(|_| 10).collect();
        let offload = TxOffload { insert_checksum: true, ..Default::default() };
        let out = q
            .submit(&mut client, PacketHandle(2), &frags(&lens), Some(&offload))
            .unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 9 });
    }

    #[test]
    fn empty_fragment_list_is_rejected() {
        let (mut q, mut client, _log) = open_queue(8);
        let err = q.submit(&mut client, PacketHandle(1), &[], None).unwrap_err();
        assert_eq!(err, Error::EmptyPacket);
    }

    #[test]
    fn occupied_metadata_slot_unwinds_the_mappings() {
        let (mut q, mut client, log) = open_queue(8);
        // Wedge the metadata entry the next submission will claim.
        q.meta_mut()
            .claim(0, TxPacketMeta { handle: PacketHandle(99), span: 1, bytes: 0, mappings: Vec::new() })
            .ok()
            .unwrap();
        let err = q
            .submit(&mut client, PacketHandle(1), &frags(&[10, 20]), None)
            .unwrap_err();
        assert_eq!(err, Error::RingCorrupt);
        {
            let log = log.borrow();
            // Both fragment mappings were mapped, both released again.
            assert_eq!(log.maps.len(), 3);
            assert_eq!(log.unmaps.len(), 2);
        }
        assert!(q.hw_mut().doorbells.is_empty());
    }

    #[test]
    fn mapping_failure_unwinds_cleanly() {
        let (mut q, mut client, log) = open_queue(8);
        // One mapping exists already (the descriptor ring); let two
        // fragments map, then fail the third.
        log.borrow_mut().fail_after = Some(3);
        let err = q
            .submit(&mut client, PacketHandle(1), &frags(&[10, 20, 30]), None)
            .unwrap_err();
        assert_eq!(err, Error::MappingFailed);
        {
            let log = log.borrow();
            assert_eq!(log.maps.len(), 3);
            assert_eq!(log.unmaps.len(), 2);
        }
        assert_eq!(q.next_to_use(), 0);
        assert!(q.hw_mut().doorbells.is_empty());

        // The queue keeps working once mapping recovers.
        log.borrow_mut().fail_after = None;
        let out = q.submit(&mut client, PacketHandle(2), &frags(&[10]), None).unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 1 });
    }

    #[test]
    fn reap_never_tears_a_packet() {
        let (mut q, mut client, _log) = open_queue(16);
        submit_spans(&mut q, &mut client, &[2, 3, 1, 4, 2]);
        assert_eq!(q.next_to_use(), 12);

        // Five descriptors retired: exactly the first two packets.
        q.hw_mut().completed = 5;
        let summary = q.reap(&mut client, usize::MAX).unwrap();
        assert_eq!(summary.packets, 2);
        assert_eq!(summary.bytes, 500);
        assert_eq!(summary.outcome, PollOutcome::Complete);
        assert_eq!(q.next_to_clean(), 5);

        // One more descriptor covers the span-1 third packet exactly.
        q.hw_mut().completed = 6;
        let summary = q.reap(&mut client, usize::MAX).unwrap();
        assert_eq!(summary.packets, 1);
        assert_eq!(q.next_to_clean(), 6);

        // Three further descriptors are one short of the 4-span packet.
        q.hw_mut().completed = 9;
        let summary = q.reap(&mut client, usize::MAX).unwrap();
        assert_eq!(summary.packets, 0);
        assert_eq!(q.next_to_clean(), 6);

        q.hw_mut().completed = 12;
        let summary = q.reap(&mut client, usize::MAX).unwrap();
        assert_eq!(summary.packets, 2);
        assert_eq!(q.next_to_clean(), 12);
        assert_eq!(client.transmitted.len(), 5);
        assert_eq!(client.transmitted[0], (PacketHandle(0), 200));
        assert_eq!(client.transmitted[4], (PacketHandle(4), 200));
    }

    #[test]
    fn reap_releases_fragment_mappings() {
        let (mut q, mut client, log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[10, 20]), None).unwrap();
        q.hw_mut().completed = 2;
        q.reap(&mut client, usize::MAX).unwrap();
        let log = log.borrow();
        // Both fragment mappings released; the ring mapping stays.
        assert_eq!(log.unmaps.len(), 2);
    }

    #[test]
    fn backpressure_hysteresis() {
        let (mut q, mut client, _log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[1, 1]), None).unwrap();
        q.submit(&mut client, PacketHandle(2), &frags(&[1, 1]), None).unwrap();
        assert!(client.stopped.is_empty());
        q.submit(&mut client, PacketHandle(3), &frags(&[1, 1]), None).unwrap();
        assert_eq!(client.stopped, [QueueId(0)]);
        assert!(q.is_stopped());

        // While stopped nothing is written and no doorbell rings.
        let doorbells = q.hw_mut().doorbells.len();
        let out = q.submit(&mut client, PacketHandle(4), &frags(&[1]), None).unwrap();
        assert_eq!(out, SubmitOutcome::WouldBlock);
        assert_eq!(q.hw_mut().doorbells.len(), doorbells);
        assert_eq!(q.next_to_use(), 6);

        // One packet reaped leaves 4 free, inside the hysteresis band.
        q.hw_mut().completed = 2;
        q.reap(&mut client, usize::MAX).unwrap();
        assert!(q.is_stopped());
        assert!(client.resumed.is_empty());

        q.hw_mut().completed = 6;
        q.reap(&mut client, usize::MAX).unwrap();
        assert!(!q.is_stopped());
        assert_eq!(client.resumed, [QueueId(0)]);
        let out = q.submit(&mut client, PacketHandle(5), &frags(&[1]), None).unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 1 });
    }

    #[test]
    fn counter_overrun_is_fatal() {
        let (mut q, mut client, _log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[1, 1]), None).unwrap();
        q.hw_mut().completed = 3;
        assert_eq!(q.reap(&mut client, usize::MAX).unwrap_err(), Error::RingCorrupt);
    }

    #[test]
    fn interrupt_unmasks_once_when_drained() {
        let (mut q, mut client, _log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[1]), None).unwrap();
        q.hw_mut().completed = 1;
        let summary = q.handle_interrupt(&mut client, 16).unwrap();
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.outcome, PollOutcome::Complete);
        assert_eq!(q.hw_mut().unmask_count, 1);
        assert!(!q.hw_mut().masked);
    }

    #[test]
    fn budget_exhaustion_keeps_the_interrupt_masked() {
        let (mut q, mut client, _log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[1]), None).unwrap();
        q.submit(&mut client, PacketHandle(2), &frags(&[1]), None).unwrap();
        q.hw_mut().completed = 2;
        let summary = q.handle_interrupt(&mut client, 1).unwrap();
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.outcome, PollOutcome::MoreWork);
        assert_eq!(q.hw_mut().unmask_count, 0);
        assert!(q.hw_mut().masked);

        // The chained pass finishes the backlog and re-arms.
        let summary = q.handle_interrupt(&mut client, 1).unwrap();
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.outcome, PollOutcome::Complete);
        assert_eq!(q.hw_mut().unmask_count, 1);
    }

    #[test]
    fn frame_coalescing_marks_every_nth_descriptor() {
        let (mapper, _log) = SimMapper::new();
        let mut q: TestQueue = TxQueue::open(
            QueueId(0),
            config(16),
            CoalesceConfig { usecs: 50, frames: 3 },
            SimTxHardware::default(),
            mapper,
        )
        .unwrap();
        let mut client = SimClient::default();
        // Third packet's completion carries the interrupt request; the
        // ring still retires all of them off the hardware counter.
        submit_spans(&mut q, &mut client, &[1, 1, 1, 1]);
        q.hw_mut().completed = 4;
        let summary = q.reap(&mut client, usize::MAX).unwrap();
        assert_eq!(summary.packets, 4);
        assert_eq!(q.hw_mut().coalesce, CoalesceConfig { usecs: 50, frames: 3 });
    }

    #[test]
    fn close_unmaps_everything() {
        let (mut q, mut client, log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[10, 20]), None).unwrap();
        q.close().unwrap();
        let log = log.borrow();
        assert_eq!(log.maps.len(), 3);
        assert_eq!(log.unmaps.len(), 3);
    }

    #[test]
    fn stop_timeout_surfaces_from_close() {
        let (mut q, _client, _log) = open_queue(8);
        q.hw_mut().fail_stop = true;
        assert_eq!(q.close().unwrap_err(), Error::HardwareTimeout);
    }

    #[test]
    fn change_depth_reopens_fresh() {
        let (mut q, mut client, log) = open_queue(8);
        q.submit(&mut client, PacketHandle(1), &frags(&[10]), None).unwrap();
        q.change_depth(16).unwrap();
        assert_eq!(q.next_to_use(), 0);
        assert_eq!(q.available_for_submit(), 16);
        assert_eq!(q.hw_mut().starts, 2);
        {
            let log = log.borrow();
            // The old ring and the in-flight fragment were both unmapped.
            assert_eq!(log.unmaps.len(), 2);
        }

        assert_eq!(q.change_depth(13).unwrap_err(), Error::InvalidDepth);
        let out = q.submit(&mut client, PacketHandle(2), &frags(&[10]), None).unwrap();
        assert_eq!(out, SubmitOutcome::Queued { descriptors: 1 });
    }
}
