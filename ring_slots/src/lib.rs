//! The slot table at the bottom of every descriptor ring.
//!
//! A [`RingSlotTable`] is a power-of-two array of hardware-visible
//! descriptors addressed by free-running `u16` producer and consumer
//! counters. The counters never reset; a counter's physical slot is
//! `counter & (depth - 1)` and its wrap generation is the next bit up, so
//! availability arithmetic stays correct across `u16` wraparound.
//!
//! A [`SlotArena`] holds the software-only metadata that parallels the
//! descriptors (mappings, packet handles, spans). Entries are guarded by a
//! generation counter bumped on every release, so a [`SlotRef`] kept past
//! its packet's reclaim is rejected instead of silently reading a newer
//! packet's state.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{fence, Ordering};

/// Smallest supported ring depth.
pub const MIN_RING_DEPTH: usize = 4;
/// Largest supported ring depth.
pub const MAX_RING_DEPTH: usize = 32768;

/// The descriptor array of one ring plus its producer/consumer counters.
///
/// The table enforces the ownership ranges: producers may only write slots
/// in `[next_to_use, next_to_clean + depth)` and consumers may only read
/// slots in `[next_to_clean, next_to_use)`. It says nothing about what a
/// descriptor means; that is the codec's business.
pub struct RingSlotTable<D> {
    descs: Box<[D]>,
    next_to_use: u16,
    next_to_clean: u16,
    mask: u16,
    depth_log2: u32,
}

impl<D: Default> RingSlotTable<D> {
    /// Allocates a table of `depth` power-on-state descriptors.
    ///
    /// `depth` must be a power of two in `MIN_RING_DEPTH..=MAX_RING_DEPTH`.
    pub fn with_depth(depth: usize) -> Result<RingSlotTable<D>, &'static str> {
        if !depth.is_power_of_two() || depth < MIN_RING_DEPTH || depth > MAX_RING_DEPTH {
            return Err("ring depth must be a power of two between 4 and 32768");
        }
        let mut descs = Vec::with_capacity(depth);
        descs.resize_with(depth, D::default);
        Ok(RingSlotTable {
            descs: descs.into_boxed_slice(),
            next_to_use: 0,
            next_to_clean: 0,
            mask: (depth - 1) as u16,
            depth_log2: depth.trailing_zeros(),
        })
    }

    pub fn depth(&self) -> usize {
        self.descs.len()
    }

    /// Free-running producer counter.
    pub fn next_to_use(&self) -> u16 {
        self.next_to_use
    }

    /// Free-running consumer counter.
    pub fn next_to_clean(&self) -> u16 {
        self.next_to_clean
    }

    /// Descriptors currently owned by hardware or pending reclaim.
    pub fn outstanding(&self) -> u16 {
        self.next_to_use.wrapping_sub(self.next_to_clean)
    }

    /// Slots the producer may still write before the ring is full.
    pub fn available_for_submit(&self) -> u16 {
        self.depth() as u16 - self.outstanding()
    }

    /// Physical slot index for a free-running counter value.
    pub fn index(&self, counter: u16) -> usize {
        (counter & self.mask) as usize
    }

    /// Wrap-generation bit for a free-running counter value. Flips each
    /// time the counter laps the ring.
    pub fn parity(&self, counter: u16) -> bool {
        (counter >> self.depth_log2) & 1 == 1
    }

    /// Host address of the first descriptor, for bus mapping at queue open.
    pub fn base_host_addr(&self) -> usize {
        self.descs.as_ptr() as usize
    }

    /// Byte length of the descriptor array, for the device's ring-length
    /// register.
    pub fn len_bytes(&self) -> u32 {
        (self.descs.len() * core::mem::size_of::<D>()) as u32
    }

    /// Mutable access to a slot the producer is about to fill.
    ///
    /// `counter` must lie in the software-owned range
    /// `[next_to_use, next_to_use + available_for_submit())`.
    pub fn producer_slot(&mut self, counter: u16) -> Result<&mut D, &'static str> {
        if counter.wrapping_sub(self.next_to_use) >= self.available_for_submit() {
            return Err("descriptor write outside the software-owned range");
        }
        let idx = self.index(counter);
        Ok(&mut self.descs[idx])
    }

    /// Read access to a slot that is outstanding (posted to hardware).
    ///
    /// `counter` must lie in `[next_to_clean, next_to_use)`.
    pub fn outstanding_slot(&self, counter: u16) -> Result<&D, &'static str> {
        if counter.wrapping_sub(self.next_to_clean) >= self.outstanding() {
            return Err("descriptor read outside the hardware-owned range");
        }
        Ok(&self.descs[self.index(counter)])
    }

    /// Hands a fully-encoded run of `span` slots to hardware.
    ///
    /// All slots of the run except the last must already carry their
    /// ownership flag from encode time; hardware begins the run only at the
    /// gating descriptor. This method issues the release barrier that makes
    /// every slot's contents visible, then calls `gate` on the run's last
    /// descriptor with that slot's wrap parity, then advances the producer
    /// counter. The caller's doorbell must come after this returns, never
    /// before.
    pub fn publish_run(
        &mut self,
        span: u16,
        gate: impl FnOnce(&mut D, bool),
    ) -> Result<(), &'static str> {
        if span == 0 {
            return Err("cannot publish an empty run");
        }
        if span > self.available_for_submit() {
            return Err("run exceeds the software-owned range");
        }
        let last = self.next_to_use.wrapping_add(span - 1);
        let parity = self.parity(last);
        let idx = self.index(last);
        fence(Ordering::Release);
        gate(&mut self.descs[idx], parity);
        self.next_to_use = self.next_to_use.wrapping_add(span);
        Ok(())
    }

    /// Raw access to a slot by physical index, bypassing the ownership
    /// ranges. For software device models and post-mortem diagnostics; the
    /// producer and consumer paths never use this.
    pub fn device_slot_mut(&mut self, index: usize) -> &mut D {
        &mut self.descs[index & self.mask as usize]
    }

    /// Retires `span` reclaimed slots.
    pub fn advance_consumer(&mut self, span: u16) -> Result<(), &'static str> {
        if span > self.outstanding() {
            return Err("consumer advance past the producer counter");
        }
        self.next_to_clean = self.next_to_clean.wrapping_add(span);
        Ok(())
    }
}


/// A handle into a [`SlotArena`], valid until the entry it names is
/// released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef {
    index: u16,
    generation: u32,
}

impl SlotRef {
    pub fn index(&self) -> u16 {
        self.index
    }
}

struct ArenaEntry<M> {
    generation: u32,
    value: Option<M>,
}

/// Generational storage for per-slot software metadata.
///
/// One entry per ring slot. Releasing an entry bumps its generation, so
/// any [`SlotRef`] taken before the release stops resolving.
pub struct SlotArena<M> {
    entries: Box<[ArenaEntry<M>]>,
}

impl<M> SlotArena<M> {
    pub fn with_capacity(capacity: usize) -> SlotArena<M> {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || ArenaEntry { generation: 0, value: None });
        SlotArena { entries: entries.into_boxed_slice() }
    }

    /// Stores metadata at `index` and returns the handle for it.
    /// The entry must be vacant; slot ownership guarantees that when the
    /// index discipline is respected. An occupied or out-of-range entry
    /// hands the value back so the caller can release whatever it holds.
    pub fn claim(&mut self, index: u16, value: M) -> Result<SlotRef, M> {
        let entry = match self.entries.get_mut(index as usize) {
            Some(entry) => entry,
            None => return Err(value),
        };
        if entry.value.is_some() {
            return Err(value);
        }
        entry.value = Some(value);
        Ok(SlotRef { index, generation: entry.generation })
    }

    pub fn get(&self, slot: SlotRef) -> Option<&M> {
        let entry = self.entries.get(slot.index as usize)?;
        if entry.generation != slot.generation {
            return None;
        }
        entry.value.as_ref()
    }

    pub fn get_mut(&mut self, slot: SlotRef) -> Option<&mut M> {
        let entry = self.entries.get_mut(slot.index as usize)?;
        if entry.generation != slot.generation {
            return None;
        }
        entry.value.as_mut()
    }

    /// Takes the metadata out through its handle, bumping the generation.
    pub fn release(&mut self, slot: SlotRef) -> Option<M> {
        let entry = self.entries.get_mut(slot.index as usize)?;
        if entry.generation != slot.generation {
            return None;
        }
        let value = entry.value.take();
        if value.is_some() {
            entry.generation = entry.generation.wrapping_add(1);
        }
        value
    }

    /// Takes the metadata at a physical index, bumping the generation.
    /// The consumer path uses this, since it walks the ring by counter.
    pub fn release_at(&mut self, index: u16) -> Option<M> {
        let entry = self.entries.get_mut(index as usize)?;
        let value = entry.value.take();
        if value.is_some() {
            entry.generation = entry.generation.wrapping_add(1);
        }
        value
    }

    /// Peeks at the metadata at a physical index without releasing it.
    pub fn peek_at(&self, index: u16) -> Option<&M> {
        self.entries.get(index as usize)?.value.as_ref()
    }

    /// Drains every occupied entry, in index order. Used at queue teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = M> + '_ {
        self.entries.iter_mut().filter_map(|entry| {
            let value = entry.value.take();
            if value.is_some() {
                entry.generation = entry.generation.wrapping_add(1);
            }
            value
        })
    }
}
