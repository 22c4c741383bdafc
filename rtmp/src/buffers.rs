//! Pooled byte buffers that can be shared by many consumers without copying.
//!
//! A message payload is accumulated into a [`BufferBuilder`] rented from a [`BufferPool`] and then
//! frozen into a [`RentedBuffer`].  Cloning a `RentedBuffer` claims it, dropping a clone releases
//! that claim.  The backing allocation goes back to its pool exactly once, when the last claim is
//! released.
//!
//! ```
//! use ingest_rtmp::buffers::BufferPool;
//!
//! let pool = BufferPool::new(16, 64 * 1024);
//! let mut builder = pool.rent(3);
//! builder.extend_from_slice(&[1, 2, 3]);
//!
//! let buffer = builder.freeze();
//! let subscriber_copy = buffer.clone();
//! assert_eq!(buffer.claim_count(), 2);
//!
//! drop(buffer);
//! assert_eq!(pool.stats().returned, 0);
//!
//! drop(subscriber_copy);
//! assert_eq!(pool.stats().returned, 1);
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Point in time counters describing how a pool is being used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers handed out from the pool (fresh or recycled)
    pub rented: usize,

    /// Buffers that came back to the pool after their last claim was released
    pub returned: usize,

    /// Allocations made outside the pool because it had no capacity left
    pub unpooled: usize,

    /// Buffers currently sitting in the free list
    pub idle: usize,
}

impl PoolStats {
    /// Pooled buffers that are still held by someone
    pub fn outstanding(&self) -> usize {
        self.rented.saturating_sub(self.returned)
    }
}

/// A shared pool of reusable byte buffers.  Cloning the pool produces another handle to the
/// same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
    max_buffer_capacity: usize,
    rented: AtomicUsize,
    returned: AtomicUsize,
    unpooled: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool that keeps at most `max_buffers` pooled buffers in circulation, none of
    /// them retained with more than `max_buffer_capacity` bytes of capacity.
    pub fn new(max_buffers: usize, max_buffer_capacity: usize) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_buffers,
                max_buffer_capacity,
                rented: AtomicUsize::new(0),
                returned: AtomicUsize::new(0),
                unpooled: AtomicUsize::new(0),
            }),
        }
    }

    /// Rents an empty buffer with room for at least `capacity` bytes.
    ///
    /// When every pooled buffer is in use, or the request is larger than the pool retains, the
    /// buffer is allocated outside the pool instead.  Callers never observe a failure.
    pub fn rent(&self, capacity: usize) -> BufferBuilder {
        let inner = &self.inner;
        let outstanding = inner
            .rented
            .load(Ordering::Acquire)
            .saturating_sub(inner.returned.load(Ordering::Acquire));
        if capacity > inner.max_buffer_capacity || outstanding >= inner.max_buffers {
            inner.unpooled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                capacity,
                outstanding,
                "Buffer pool exhausted, falling back to an unpooled allocation"
            );

            return BufferBuilder {
                data: Vec::with_capacity(capacity),
                pool: None,
            };
        }

        let mut data = inner.free.lock().pop().unwrap_or_default();
        if data.capacity() < capacity {
            data.reserve(capacity);
        }

        inner.rented.fetch_add(1, Ordering::AcqRel);
        BufferBuilder {
            data,
            pool: Some(self.clone()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rented: self.inner.rented.load(Ordering::Acquire),
            returned: self.inner.returned.load(Ordering::Acquire),
            unpooled: self.inner.unpooled.load(Ordering::Acquire),
            idle: self.inner.free.lock().len(),
        }
    }

    fn give_back(&self, mut data: Vec<u8>) {
        let inner = &self.inner;
        if data.capacity() <= inner.max_buffer_capacity {
            data.clear();
            let mut free = inner.free.lock();
            if free.len() < inner.max_buffers {
                free.push(data);
            }
        }

        inner.returned.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_buffers", &self.inner.max_buffers)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer being filled.  Dropping it without freezing returns it to its pool.
pub struct BufferBuilder {
    data: Vec<u8>,
    pool: Option<BufferPool>,
}

impl BufferBuilder {
    /// A builder backed by a plain allocation that never returns to a pool
    pub fn unpooled(capacity: usize) -> Self {
        BufferBuilder {
            data: Vec::with_capacity(capacity),
            pool: None,
        }
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Makes the accumulated bytes immutable and shareable.  The returned buffer holds the first
    /// claim.
    pub fn freeze(mut self) -> RentedBuffer {
        let data = mem::take(&mut self.data);
        let pool = self.pool.take();
        RentedBuffer {
            inner: Arc::new(RentedInner { data, pool }),
        }
    }
}

impl Drop for BufferBuilder {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(mem::take(&mut self.data));
        }
    }
}

/// An immutable, reference counted byte buffer.
///
/// `clone()` claims the buffer and dropping a handle releases one claim, so a claim is matched
/// by exactly one release even when a consumer discards its copy without using it.
#[derive(Clone)]
pub struct RentedBuffer {
    inner: Arc<RentedInner>,
}

struct RentedInner {
    data: Vec<u8>,
    pool: Option<BufferPool>,
}

impl Drop for RentedInner {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(mem::take(&mut self.data));
        }
    }
}

impl RentedBuffer {
    /// Creates an empty buffer that does not belong to a pool
    pub fn empty() -> Self {
        RentedBuffer::from(Vec::new())
    }

    /// Number of live handles to this buffer
    pub fn claim_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn is_pooled(&self) -> bool {
        self.inner.pool.is_some()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.data.clone()
    }
}

impl From<Vec<u8>> for RentedBuffer {
    fn from(data: Vec<u8>) -> Self {
        RentedBuffer {
            inner: Arc::new(RentedInner { data, pool: None }),
        }
    }
}

impl From<&[u8]> for RentedBuffer {
    fn from(data: &[u8]) -> Self {
        RentedBuffer::from(data.to_vec())
    }
}

impl Deref for RentedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl AsRef<[u8]> for RentedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl PartialEq for RentedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.data == other.inner.data
    }
}

impl Eq for RentedBuffer {}

impl fmt::Debug for RentedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RentedBuffer")
            .field("len", &self.inner.data.len())
            .field("claims", &self.claim_count())
            .finish()
    }
}
