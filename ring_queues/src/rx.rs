//! The receive queue: buffer refill and completion polling.
//!
//! Slots cycle Empty -> Posted (buffer owned by hardware) -> Completed
//! (write-back owned by software) and back. Polling assembles completed
//! slots into frames, delivers small frames as copies and large ones by
//! moving their buffers out, then refills everything it consumed with one
//! batched doorbell. A refill shortfall forces another poll pass instead
//! of re-arming the interrupt, since an unstocked ring raises no further
//! events on its own.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use ring_buffers::{BufferPool, ReceiveBuffer};
use ring_descriptors::{CompletionRecord, DmaAddress, RxDescriptor};
use ring_device::{CoalesceConfig, DmaMapper, RxRingHardware};
use ring_slots::{RingSlotTable, SlotArena};

use crate::moderation::InterruptModerator;
use crate::{Error, PollOutcome, QueueId, RingClient, RingConfig};

/// A received frame as handed to the client.
pub struct RxPacket {
    pub payload: RxPayload,
    pub length: u16,
    pub checksum_ok: bool,
    pub vlan_tag: Option<u16>,
    pub rss_hash: Option<u32>,
}

/// Frames at or below the copy-break length are copied so their ring
/// buffer recycles immediately; larger frames move their buffers out and
/// the pool replaces them.
pub enum RxPayload {
    Copied(Vec<u8>),
    Loaned(Vec<ReceiveBuffer>),
}

/// What one poll pass accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxPollSummary {
    pub delivered: usize,
    pub errors: usize,
    pub outcome: PollOutcome,
}

pub struct RxQueue<D: RxDescriptor, H: RxRingHardware, M: DmaMapper> {
    id: QueueId,
    config: RingConfig,
    ring: RingSlotTable<D>,
    posted: SlotArena<ReceiveBuffer>,
    pool: Arc<BufferPool>,
    hw: H,
    mapper: M,
    moderator: InterruptModerator,
    ring_base: DmaAddress,
}

impl<D, H, M> RxQueue<D, H, M>
where
    D: RxDescriptor,
    H: RxRingHardware,
    M: DmaMapper,
{
    /// Allocates and maps the descriptor ring, fills a buffer pool of
    /// twice the ring depth so refill stays fed while frames are loaned
    /// out, posts a full ring, and starts DMA.
    pub fn open(
        id: QueueId,
        config: RingConfig,
        coalesce: CoalesceConfig,
        mut hw: H,
        mapper: M,
    ) -> Result<RxQueue<D, H, M>, Error> {
        config.validate()?;
        let ring = RingSlotTable::with_depth(config.depth).map_err(|_| Error::InvalidDepth)?;
        let ring_base = mapper
            .map(ring.base_host_addr(), ring.len_bytes() as usize)
            .map_err(|e| {
                error!("RX queue {}: descriptor ring mapping failed: {}", id, e);
                Error::MappingFailed
            })?;
        let pool = BufferPool::new(config.rx_buffer_len());
        if let Err(e) = pool.fill(config.depth * 2, &mapper) {
            error!("RX queue {}: buffer pool fill failed: {}", id, e);
            pool.drain(&mapper);
            mapper.unmap(ring_base, ring.len_bytes() as usize);
            return Err(Error::ResourceExhausted);
        }
        hw.configure(ring_base, ring.len_bytes());
        hw.set_coalesce(coalesce);

        let mut queue = RxQueue {
            id,
            posted: SlotArena::with_capacity(config.depth),
            moderator: InterruptModerator::new(coalesce),
            config,
            ring,
            pool,
            hw,
            mapper,
            ring_base,
        };
        let posted = queue.refill(queue.config.depth as u16);
        if posted < queue.config.depth {
            error!("RX queue {}: initial fill posted {} of {}", id, posted, queue.config.depth);
            queue.drain_ring();
            queue.pool.drain(&queue.mapper);
            queue.mapper.unmap(queue.ring_base, queue.ring.len_bytes() as usize);
            return Err(Error::ResourceExhausted);
        }
        queue.hw.start();
        debug!("RX queue {}: open, depth {}", id, queue.config.depth);
        Ok(queue)
    }

    /// Posts up to `want` empty slots with pool buffers, then rings one
    /// doorbell for the whole batch. Never blocks: pool exhaustion just
    /// returns the count actually posted.
    ///
    /// The newest slot is never published here. Each slot's ownership is
    /// set only once its successor is in place, so the burst's last slot
    /// stays software-owned until the gate behind the barrier.
    pub fn refill(&mut self, want: u16) -> usize {
        let mut taken: u16 = 0;
        while taken < want && taken < self.ring.available_for_submit() {
            let buf = match self.pool.take() {
                Some(buf) => buf,
                None => {
                    debug!("RX queue {}: buffer pool empty after {} refills", self.id, taken);
                    break;
                }
            };
            let counter = self.ring.next_to_use().wrapping_add(taken);
            let index = self.ring.index(counter) as u16;
            let bus = buf.bus_addr();
            let desc = match self.ring.producer_slot(counter) {
                Ok(desc) => desc,
                Err(e) => {
                    error!("RX queue {}: {}", self.id, e);
                    break;
                }
            };
            desc.set_buffer(bus);
            if self.posted.claim(index, buf).is_err() {
                error!("RX queue {}: slot {} already holds a buffer", self.id, index);
                break;
            }
            if taken > 0 {
                let prev = counter.wrapping_sub(1);
                let parity = self.ring.parity(prev);
                match self.ring.producer_slot(prev) {
                    Ok(prev_desc) => prev_desc.publish(parity),
                    Err(e) => error!("RX queue {}: {}", self.id, e),
                }
            }
            taken += 1;
        }
        if taken > 0 {
            // One barrier and one doorbell cover the burst; the gate gives
            // the last slot its ownership flag for the first time.
            match self.ring.publish_run(taken, |desc, parity| desc.publish(parity)) {
                Ok(()) => self.hw.doorbell(self.ring.next_to_use()),
                Err(e) => error!("RX queue {}: {}", self.id, e),
            }
        }
        taken as usize
    }

    /// Drains up to `budget` completed frames, then restocks the ring.
    pub fn poll(&mut self, client: &mut dyn RingClient, budget: usize) -> Result<RxPollSummary, Error> {
        let mut delivered = 0usize;
        let mut errors = 0usize;
        let mut budget_hit = false;

        loop {
            if delivered + errors >= budget {
                budget_hit = self.completion_pending();
                break;
            }
            let (span, records) = match self.completed_frame()? {
                Some(frame) => frame,
                None => break,
            };

            // Pull the frame's buffers out before the indices move.
            let mut bufs: Vec<ReceiveBuffer> = Vec::with_capacity(span as usize);
            let mut total = 0usize;
            let mut bad_length = false;
            for k in 0..span {
                let index = self.ring.index(self.ring.next_to_clean().wrapping_add(k)) as u16;
                let mut buf = match self.posted.release_at(index) {
                    Some(buf) => buf,
                    None => {
                        error!("RX queue {}: completed slot {} has no buffer", self.id, index);
                        return Err(Error::RingCorrupt);
                    }
                };
                let record = &records[k as usize];
                if buf.set_length(record.length).is_err() {
                    bad_length = true;
                }
                total += record.length as usize;
                bufs.push(buf);
            }
            self.ring.advance_consumer(span).map_err(|_| Error::RingCorrupt)?;

            let end = &records[span as usize - 1];
            if end.error || bad_length || total > u16::MAX as usize {
                // Bad frame: account it and let the buffers recycle.
                trace!("RX queue {}: dropped a bad frame of {} bytes", self.id, total);
                errors += 1;
                continue;
            }
            let packet = if total <= self.config.copy_break as usize {
                let mut copy = Vec::with_capacity(total);
                for buf in &bufs {
                    copy.extend_from_slice(buf);
                }
                // The originals recycle into the pool right away.
                drop(bufs);
                RxPacket {
                    payload: RxPayload::Copied(copy),
                    length: total as u16,
                    checksum_ok: end.checksum_ok,
                    vlan_tag: end.vlan_tag,
                    rss_hash: end.rss_hash,
                }
            } else {
                RxPacket {
                    payload: RxPayload::Loaned(bufs),
                    length: total as u16,
                    checksum_ok: end.checksum_ok,
                    vlan_tag: end.vlan_tag,
                    rss_hash: end.rss_hash,
                }
            };
            client.deliver_rx_packet(self.id, packet);
            delivered += 1;
        }

        // Restock everything consumed. Going back to sleep with unposted
        // slots can park the ring forever, so a shortfall forces another
        // pass instead of an unmask.
        let want = self.ring.available_for_submit();
        if want > 0 {
            self.refill(want);
        }
        let outcome = if budget_hit || self.ring.available_for_submit() > 0 {
            PollOutcome::MoreWork
        } else {
            PollOutcome::Complete
        };
        Ok(RxPollSummary { delivered, errors, outcome })
    }

    /// The interrupt-context entry point: mask, poll, and re-arm only
    /// after a pass that drained its backlog and fully restocked the ring.
    pub fn handle_interrupt(
        &mut self,
        client: &mut dyn RingClient,
        budget: usize,
    ) -> Result<RxPollSummary, Error> {
        self.hw.mask_interrupt();
        self.moderator.note_masked();
        let summary = self.poll(client, budget)?;
        let Self { moderator, hw, .. } = self;
        moderator.on_poll_complete(summary.outcome, || hw.unmask_interrupt());
        Ok(summary)
    }

    /// Scans forward from the consumer counter for one fully written
    /// frame. Returns its span and per-slot records, or `None` when no
    /// complete frame is ready yet.
    fn completed_frame(&self) -> Result<Option<(u16, Vec<CompletionRecord>)>, Error> {
        let start = self.ring.next_to_clean();
        let mut records = Vec::new();
        let mut span: u16 = 0;
        while span < self.ring.outstanding() {
            let counter = start.wrapping_add(span);
            let parity = self.ring.parity(counter);
            let desc = self.ring.outstanding_slot(counter).map_err(|_| Error::RingCorrupt)?;
            if !desc.is_complete(parity) {
                return Ok(None);
            }
            // The write-back words are only coherent once the completion
            // flag has been observed.
            fence(Ordering::Acquire);
            let record = desc.completion();
            let end = record.end_of_packet;
            records.push(record);
            span += 1;
            if end {
                return Ok(Some((span, records)));
            }
        }
        Ok(None)
    }

    /// True when the slot at the consumer counter has completed.
    fn completion_pending(&self) -> bool {
        if self.ring.outstanding() == 0 {
            return false;
        }
        let counter = self.ring.next_to_clean();
        match self.ring.outstanding_slot(counter) {
            Ok(desc) => desc.is_complete(self.ring.parity(counter)),
            Err(_) => false,
        }
    }

    /// Rebuilds the ring at a new depth, preserving the rest of the
    /// configuration. Posted buffers return to the pool; frames already
    /// delivered are unaffected.
    pub fn change_depth(&mut self, depth: usize) -> Result<(), Error> {
        let mut config = self.config;
        config.depth = depth;
        config.validate()?;

        self.hw.mask_interrupt();
        let stop = self.hw.stop();
        self.drain_ring();
        self.mapper.unmap(self.ring_base, self.ring.len_bytes() as usize);
        stop.map_err(|e| {
            error!("RX queue {}: stop timed out: {}", self.id, e);
            Error::HardwareTimeout
        })?;

        let ring = RingSlotTable::with_depth(depth).map_err(|_| Error::InvalidDepth)?;
        let ring_base = self
            .mapper
            .map(ring.base_host_addr(), ring.len_bytes() as usize)
            .map_err(|_| Error::MappingFailed)?;
        if depth > self.config.depth {
            // Deeper rings need a deeper pool; top it up to twice the new
            // depth. A fill failure only shortens the first refill.
            let extra = (depth - self.config.depth) * 2;
            if let Err(e) = self.pool.fill(extra, &self.mapper) {
                warn!("RX queue {}: pool top-up failed: {}", self.id, e);
            }
        }
        self.hw.configure(ring_base, ring.len_bytes());
        self.ring = ring;
        self.posted = SlotArena::with_capacity(depth);
        self.ring_base = ring_base;
        self.config = config;
        let posted = self.refill(depth as u16);
        if posted < depth {
            warn!("RX queue {}: refill posted {} of {} after resize", self.id, posted, depth);
        }
        self.hw.start();
        self.hw.unmask_interrupt();
        debug!("RX queue {}: reopened at depth {}", self.id, depth);
        Ok(())
    }

    /// Stops DMA, returns every posted buffer to the pool, and releases
    /// the pool's mappings and the ring mapping.
    ///
    /// Frames still loaned to the client keep their storage until they are
    /// dropped; callers should release delivered frames before closing.
    pub fn close(mut self) -> Result<(), Error> {
        self.hw.mask_interrupt();
        let stop = self.hw.stop();
        self.drain_ring();
        self.pool.drain(&self.mapper);
        self.mapper.unmap(self.ring_base, self.ring.len_bytes() as usize);
        stop.map_err(|e| {
            error!("RX queue {}: stop timed out: {}", self.id, e);
            Error::HardwareTimeout
        })
    }

    fn drain_ring(&mut self) {
        // Dropping each posted buffer sends its storage back to the pool.
        let count = self.posted.drain().count();
        trace!("RX queue {}: drained {} posted buffers", self.id, count);
    }

    #[cfg(test)]
    pub(crate) fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    #[cfg(test)]
    pub(crate) fn ring_mut(&mut self) -> &mut RingSlotTable<D> {
        &mut self.ring
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}
