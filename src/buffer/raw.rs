//! Receive buffer for raw mode.
//!
//! Holds at most one read's worth of bytes. The raw engine resets it before
//! every read, so `start` is always 0 and nothing ever needs to grow: a chunk
//! bigger than the buffer is simply delivered over several reads.

use std::sync::Arc;

use super::pool::{BytePool, PooledArray};
use crate::error::{Result, WireError};

/// Single-shot pooled buffer with no framing semantics.
#[derive(Debug)]
pub struct RawBuffer {
    array: PooledArray,
    length: usize,
}

impl RawBuffer {
    /// Rent a buffer of `capacity` bytes from `pool`.
    pub fn new(pool: &Arc<BytePool>, capacity: usize) -> Self {
        Self {
            array: pool.rent(capacity.max(1)),
            length: 0,
        }
    }

    /// Forget the held bytes, keep the capacity.
    #[inline]
    pub fn reset(&mut self) {
        self.length = 0;
    }

    /// Writable tail `[length, capacity)`.
    pub fn free_space(&mut self) -> Result<&mut [u8]> {
        let length = self.length;
        Ok(&mut self.array.as_mut_slice()?[length..])
    }

    /// Record `n` bytes written into the free space.
    pub fn track_written(&mut self, n: usize) -> Result<()> {
        if self.array.is_released() {
            return Err(WireError::Disposed);
        }
        if self.length + n > self.array.len() {
            return Err(WireError::InvalidState("tracked more bytes than capacity"));
        }
        self.length += n;
        Ok(())
    }

    /// Bytes held, `[0, length)`.
    pub fn data(&self) -> Result<&[u8]> {
        Ok(&self.array.as_slice()?[..self.length])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.array.len()
    }

    /// Give the array back to the pool. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.array.release();
        self.length = 0;
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.array.is_released()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let pool = BytePool::new();
        let mut buffer = RawBuffer::new(&pool, 16);

        buffer.free_space().unwrap()[..5].copy_from_slice(b"hello");
        buffer.track_written(5).unwrap();

        assert_eq!(buffer.data().unwrap(), b"hello");
        assert_eq!(buffer.free_space().unwrap().len(), 11);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let pool = BytePool::new();
        let mut buffer = RawBuffer::new(&pool, 16);
        buffer.track_written(10).unwrap();

        buffer.reset();

        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.free_space().unwrap().len(), 16);
    }

    #[test]
    fn test_track_beyond_capacity_fails() {
        let pool = BytePool::new();
        let mut buffer = RawBuffer::new(&pool, 4);

        assert!(buffer.track_written(3).is_ok());
        assert!(matches!(
            buffer.track_written(2),
            Err(WireError::InvalidState(_))
        ));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_use_after_dispose_fails() {
        let pool = BytePool::new();
        let mut buffer = RawBuffer::new(&pool, 8);

        buffer.dispose();
        buffer.dispose();

        assert!(buffer.is_disposed());
        assert!(matches!(buffer.free_space(), Err(WireError::Disposed)));
        assert!(matches!(buffer.data(), Err(WireError::Disposed)));
        assert!(matches!(buffer.track_written(1), Err(WireError::Disposed)));
        assert_eq!(pool.returned(), 1);
    }
}
