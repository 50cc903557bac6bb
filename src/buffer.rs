//! The buffer manager: a fixed-cardinality pool of pre-registered buffers
//! used to stage outgoing and incoming messages, plus the registration API
//! exposed to callers that bring their own memory for direct RDMA transfer.

use crate::error::StatusError;
use crate::transport::{Fabric, RegionHandle};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A magic value stamped into a buffer at registration time and cleared on
/// deregistration. Any operation against a buffer whose cookie does not
/// verify fails with `E_BAD_PARAM` rather than touching the memory.
const MAGIC_COOKIE: u64 = 0xFACE_FEED_CAFE_BABE;

/// Capacity of each buffer in the manager's fixed pool. Large enough to
/// inline typical keys plus small values alongside a message header.
pub const BUFFER_LEN: usize = 64 * 1024;

/// A pre-registered region of memory, checked out from a [`BufferManager`].
pub struct Buffer {
    slot: usize,
    data: Vec<u8>,
    len: usize,
    capacity: usize,
    cookie: u64,
    region: RegionHandle,
}

impl Buffer {
    fn new(slot: usize, capacity: usize, region: RegionHandle) -> Self {
        Self {
            slot,
            data: vec![0u8; capacity],
            len: 0,
            capacity,
            cookie: MAGIC_COOKIE,
            region,
        }
    }

    pub fn verify(&self) -> Result<(), StatusError> {
        if self.cookie == MAGIC_COOKIE {
            Ok(())
        } else {
            Err(StatusError::BadParam)
        }
    }

    pub fn region_handle(&self) -> RegionHandle {
        self.region
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Copy `bytes` into the buffer's base and set its length. Fails with
    /// `E_TOO_LARGE` if `bytes` exceeds the buffer's original capacity.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<(), StatusError> {
        self.verify()?;
        if bytes.len() > self.capacity {
            return Err(StatusError::TooLarge);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }
}

/// Fixed-cardinality pool of [`Buffer`]s, each backed by a region registered
/// with the connection's fabric endpoint. `allocate` suspends when the pool
/// is momentarily exhausted rather than failing — exhaustion only happens
/// if a caller forgot to `free_buffer` a prior checkout, which callers here
/// never do (exactly one outstanding request per connection).
pub struct BufferManager {
    fabric: Arc<dyn Fabric>,
    slots: Mutex<Vec<Option<Buffer>>>,
    free: Mutex<VecDeque<usize>>,
    notify: Notify,
    buffer_len: usize,
}

impl BufferManager {
    pub fn new(fabric: Arc<dyn Fabric>, count: usize, buffer_len: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        let mut free = VecDeque::with_capacity(count);
        for i in 0..count {
            let region = fabric.register_region(vec![0u8; buffer_len]);
            slots.push(Some(Buffer::new(i, buffer_len, region)));
            free.push_back(i);
        }
        Self {
            fabric,
            slots: Mutex::new(slots),
            free: Mutex::new(free),
            notify: Notify::new(),
            buffer_len,
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Check out an idle buffer, suspending until one is available.
    pub async fn allocate(&self) -> Buffer {
        loop {
            if let Some(idx) = self.free.lock().await.pop_front() {
                return self.slots.lock().await[idx].take().expect("slot index is free-listed");
            }
            self.notify.notified().await;
        }
    }

    /// Return a checked-out buffer to the pool.
    pub async fn free_buffer(&self, mut buffer: Buffer) {
        buffer.len = 0;
        let idx = buffer.slot;
        self.slots.lock().await[idx] = Some(buffer);
        self.free.lock().await.push_back(idx);
        self.notify.notify_one();
    }

    /// Register caller-supplied memory (e.g. a `get_direct` destination) for
    /// RDMA access and return the handle to hand to the peer.
    pub fn register_memory(&self, bytes: Vec<u8>) -> RegionHandle {
        self.fabric.register_region(bytes)
    }

    pub fn deregister_memory(&self, handle: RegionHandle) {
        self.fabric.deregister_region(handle);
    }

    pub fn fabric(&self) -> &Arc<dyn Fabric> {
        &self.fabric
    }
}
