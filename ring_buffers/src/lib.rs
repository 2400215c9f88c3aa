//! Pooled receive buffers.
//!
//! Buffers are allocated and bus-mapped once, when the pool is filled, and
//! then cycle between the pool and the ring for the lifetime of the queue.
//! A [`ReceiveBuffer`] auto-dereferences into its byte slice and returns its
//! storage to the pool when dropped, so a consumer that holds one past the
//! delivery callback keeps the memory loaned until it lets go.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use] extern crate log;

use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::ops::{Deref, DerefMut};
use spin::Mutex;

use ring_descriptors::DmaAddress;
use ring_device::DmaMapper;

/// One buffer's backing memory together with its bus mapping.
struct PooledStorage {
    bytes: Box<[u8]>,
    bus: DmaAddress,
}

/// A bounded pool of equally-sized, pre-mapped buffers.
///
/// Shared between the refill path (which takes buffers) and every
/// outstanding [`ReceiveBuffer`] (which returns its storage on drop).
pub struct BufferPool {
    idle: Mutex<Vec<PooledStorage>>,
    buffer_len: u16,
}

impl BufferPool {
    /// Creates an empty pool whose buffers will each hold `buffer_len` bytes.
    pub fn new(buffer_len: u16) -> Arc<BufferPool> {
        Arc::new(BufferPool {
            idle: Mutex::new(Vec::new()),
            buffer_len,
        })
    }

    /// Allocates and bus-maps `count` buffers into the pool.
    ///
    /// On a mapping failure the buffers mapped so far stay in the pool.
    pub fn fill(&self, count: usize, mapper: &dyn DmaMapper) -> Result<(), &'static str> {
        for _ in 0..count {
            let bytes = vec![0u8; self.buffer_len as usize].into_boxed_slice();
            let bus = mapper.map(bytes.as_ptr() as usize, self.buffer_len as usize)?;
            self.idle.lock().push(PooledStorage { bytes, bus });
        }
        Ok(())
    }

    /// Takes a buffer out of the pool, or `None` if it is empty.
    ///
    /// The returned buffer starts with its length set to its full capacity,
    /// which is what the refill path posts to hardware.
    pub fn take(self: &Arc<Self>) -> Option<ReceiveBuffer> {
        let storage = self.idle.lock().pop()?;
        Some(ReceiveBuffer {
            length: self.buffer_len,
            storage: Some(storage),
            pool: Arc::clone(self),
        })
    }

    /// Number of buffers currently sitting idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Capacity of each buffer in this pool.
    pub fn buffer_len(&self) -> u16 {
        self.buffer_len
    }

    /// Unmaps and frees every idle buffer. Called at queue teardown, after
    /// the ring has been drained back into the pool.
    pub fn drain(&self, mapper: &dyn DmaMapper) {
        let mut idle = self.idle.lock();
        for storage in idle.drain(..) {
            mapper.unmap(storage.bus, self.buffer_len as usize);
            drop(storage.bytes);
        }
    }

    fn give_back(&self, storage: PooledStorage) {
        self.idle.lock().push(storage);
    }
}

/// A packet buffer loaned out of a [`BufferPool`].
///
/// Auto-dereferences into a byte slice of its current length. Its storage
/// (and bus mapping) go back to the pool when it is dropped.
pub struct ReceiveBuffer {
    storage: Option<PooledStorage>,
    length: u16,
    pool: Arc<BufferPool>,
}

impl ReceiveBuffer {
    /// The bus address hardware writes this buffer through.
    pub fn bus_addr(&self) -> DmaAddress {
        // The storage Option is only None inside drop().
        match &self.storage {
            Some(s) => s.bus,
            None => DmaAddress(0),
        }
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn capacity(&self) -> u16 {
        self.pool.buffer_len
    }

    /// Shrinks the visible length to what hardware actually wrote.
    ///
    /// Returns an error if `length` exceeds the buffer's capacity.
    pub fn set_length(&mut self, length: u16) -> Result<(), &'static str> {
        if length > self.pool.buffer_len {
            Err("ReceiveBuffer::set_length(): length exceeds buffer capacity")
        } else {
            self.length = length;
            Ok(())
        }
    }
}

impl Deref for ReceiveBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.storage {
            Some(s) => &s.bytes[..self.length as usize],
            None => &[],
        }
    }
}

impl DerefMut for ReceiveBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let length = self.length as usize;
        match &mut self.storage {
            Some(s) => &mut s.bytes[..length],
            None => &mut [],
        }
    }
}

impl Drop for ReceiveBuffer {
    fn drop(&mut self) {
        match self.storage.take() {
            Some(storage) => self.pool.give_back(storage),
            None => error!("ReceiveBuffer::drop(): buffer had no storage to return"),
        }
    }
}
