//! Shared pool of byte arrays.
//!
//! Engines rent one array per receive buffer and give it back when the buffer
//! is disposed. A [`PooledArray`] returns its array exactly once, either
//! through [`PooledArray::release`] or when it is dropped.
//!
//! # Example
//!
//! ```
//! use streamwire::buffer::BytePool;
//!
//! let pool = BytePool::new();
//! let array = pool.rent(1024);
//! assert!(array.len() >= 1024);
//! drop(array);
//!
//! assert_eq!(pool.retained(), 1);
//! let again = pool.rent(512);
//! assert!(again.len() >= 1024); // reused
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Result, WireError};

/// Default number of arrays kept for reuse.
pub const DEFAULT_MAX_RETAINED: usize = 16;

/// Default largest array the pool keeps (16 MB).
pub const DEFAULT_MAX_RETAINED_LEN: usize = 16 * 1024 * 1024;

/// Pool of reusable byte arrays.
#[derive(Debug)]
pub struct BytePool {
    free: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
    max_retained_len: usize,
    rented: AtomicUsize,
    returned: AtomicUsize,
}

impl BytePool {
    /// Create a pool with default limits.
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEFAULT_MAX_RETAINED, DEFAULT_MAX_RETAINED_LEN)
    }

    /// Create a pool with custom retention limits.
    pub fn with_limits(max_retained: usize, max_retained_len: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            max_retained,
            max_retained_len,
            rented: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
        })
    }

    /// The process-wide pool used when none is injected.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<BytePool>> = OnceLock::new();
        SHARED.get_or_init(BytePool::new).clone()
    }

    /// Rent an array of at least `min_len` bytes.
    ///
    /// The contents of a reused array are unspecified.
    pub fn rent(self: &Arc<Self>, min_len: usize) -> PooledArray {
        let reused = {
            let mut free = self.free.lock();
            free.iter()
                .position(|a| a.len() >= min_len)
                .map(|i| free.swap_remove(i))
        };
        let array = reused.unwrap_or_else(|| vec![0u8; min_len]);
        self.rented.fetch_add(1, Ordering::Relaxed);

        PooledArray {
            array: Some(array),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, array: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        if array.len() > self.max_retained_len {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(array);
        }
    }

    /// Total arrays handed out.
    pub fn rented(&self) -> usize {
        self.rented.load(Ordering::Relaxed)
    }

    /// Total arrays given back.
    pub fn returned(&self) -> usize {
        self.returned.load(Ordering::Relaxed)
    }

    /// Arrays currently held for reuse.
    pub fn retained(&self) -> usize {
        self.free.lock().len()
    }
}

/// A byte array on loan from a [`BytePool`].
///
/// Never exposes the backing `Vec`; callers get slices.
#[derive(Debug)]
pub struct PooledArray {
    array: Option<Vec<u8>>,
    pool: Arc<BytePool>,
}

impl PooledArray {
    /// Length of the array, 0 once released.
    #[inline]
    pub fn len(&self) -> usize {
        self.array.as_ref().map_or(0, Vec::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.array.is_none()
    }

    pub fn as_slice(&self) -> Result<&[u8]> {
        self.array.as_deref().ok_or(WireError::Disposed)
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        self.array.as_deref_mut().ok_or(WireError::Disposed)
    }

    /// Rent a larger array from the same pool, copy `live` into it at offset
    /// 0 and give this one back.
    pub fn regrow(&mut self, new_len: usize, live: std::ops::Range<usize>) -> Result<()> {
        let old = self.array.as_ref().ok_or(WireError::Disposed)?;
        let mut next = self.pool.rent(new_len);
        let live_len = live.len();
        next.as_mut_slice()?[..live_len].copy_from_slice(&old[live]);

        // Swap arrays so `next` carries the old one back on drop.
        std::mem::swap(&mut self.array, &mut next.array);
        Ok(())
    }

    /// Return the array to the pool. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(array) = self.array.take() {
            self.pool.give_back(array);
        }
    }
}

impl Drop for PooledArray {
    fn drop(&mut self) {
        self.release();
    }
}
