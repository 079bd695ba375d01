//! Receive buffer for messaging mode.
//!
//! Accumulates partial reads and answers one question: does the live region
//! `[start, start + length)` begin with a complete frame?
//!
//! - Waiting for header: fewer than 4 bytes held
//! - Waiting for payload: header parsed, `declared` bytes not all here yet
//! - Complete: `length >= 4 + declared`
//!
//! After a frame is consumed, [`FramingBuffer::reset`] either just moves
//! `start` (more full frames are waiting), clears (nothing left), or compacts
//! the partial remainder to offset 0 so the next read has maximal room.
//!
//! # Example
//!
//! ```
//! use streamwire::buffer::{BytePool, FramingBuffer};
//! use streamwire::protocol::build_frame;
//!
//! let pool = BytePool::new();
//! let mut buffer = FramingBuffer::new(&pool, 64, 1024);
//!
//! let frame = build_frame(b"hello").unwrap();
//! buffer.free_space().unwrap()[..frame.len()].copy_from_slice(&frame);
//! buffer.track_written(frame.len()).unwrap();
//!
//! assert!(buffer.contains_full_message().unwrap());
//! assert_eq!(buffer.message().unwrap(), b"hello");
//! buffer.reset().unwrap();
//! assert!(buffer.is_empty());
//! ```

use std::sync::Arc;

use super::pool::{BytePool, PooledArray};
use crate::error::{Result, WireError};
use crate::protocol::{decode_header, validate_declared, HEADER_SIZE};

/// Growable pooled buffer that understands the length prefix.
#[derive(Debug)]
pub struct FramingBuffer {
    array: PooledArray,
    start: usize,
    length: usize,
    extreme_message_size: usize,
    /// Payload size of the frame at `start`, once its header is complete.
    declared: Option<usize>,
}

impl FramingBuffer {
    /// Rent a buffer of `capacity` bytes that rejects frames declaring more
    /// than `extreme_message_size` payload bytes.
    pub fn new(pool: &Arc<BytePool>, capacity: usize, extreme_message_size: usize) -> Self {
        Self {
            array: pool.rent(capacity.max(HEADER_SIZE)),
            start: 0,
            length: 0,
            extreme_message_size,
            declared: None,
        }
    }

    /// Writable tail `[start + length, capacity)`.
    pub fn free_space(&mut self) -> Result<&mut [u8]> {
        let end = self.start + self.length;
        Ok(&mut self.array.as_mut_slice()?[end..])
    }

    /// Record `n` bytes written into the free space.
    pub fn track_written(&mut self, n: usize) -> Result<()> {
        if self.array.is_released() {
            return Err(WireError::Disposed);
        }
        if self.start + self.length + n > self.array.len() {
            return Err(WireError::InvalidState("tracked more bytes than capacity"));
        }
        self.length += n;
        Ok(())
    }

    /// True when no byte can be written without growing or compacting.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.start + self.length >= self.array.len()
    }

    /// Parse the header at `start` if it is complete and not parsed yet.
    ///
    /// # Errors
    ///
    /// - `FrameTooLarge` if the declared size exceeds the extreme message size
    /// - `MalformedFrame` if the declared size is negative
    fn parse_header(&mut self) -> Result<Option<usize>> {
        if self.declared.is_some() || self.length < HEADER_SIZE {
            return Ok(self.declared);
        }

        let live = &self.array.as_slice()?[self.start..self.start + self.length];
        let Some(raw) = decode_header(live) else {
            return Ok(None);
        };
        let size = validate_declared(raw, self.extreme_message_size)?;
        self.declared = Some(size);
        Ok(self.declared)
    }

    /// Payload size declared by the frame at `start`, if its header is here.
    pub fn declared_message_size(&mut self) -> Result<Option<usize>> {
        self.parse_header()
    }

    /// Whether the live region begins with one complete frame.
    ///
    /// An `Err` is a protocol violation: the connection must be dropped.
    pub fn contains_full_message(&mut self) -> Result<bool> {
        Ok(match self.parse_header()? {
            Some(size) => self.length >= HEADER_SIZE + size,
            None => false,
        })
    }

    /// Payload of the complete frame at `start`.
    pub fn message(&self) -> Result<&[u8]> {
        let size = match self.declared {
            Some(size) if self.length >= HEADER_SIZE + size => size,
            _ => return Err(WireError::InvalidState("no complete message in buffer")),
        };
        let begin = self.start + HEADER_SIZE;
        Ok(&self.array.as_slice()?[begin..begin + size])
    }

    /// Consume the delivered frame (if any) and tidy the remainder.
    ///
    /// - nothing left: clear to offset 0
    /// - another full frame waiting: only move `start`, no copy
    /// - partial frame left: compact it to offset 0
    pub fn reset(&mut self) -> Result<()> {
        if self.contains_full_message()? {
            let consumed = HEADER_SIZE + self.declared.unwrap_or(0);
            self.start += consumed;
            self.length -= consumed;
            self.declared = None;
        }

        if self.length == 0 {
            self.start = 0;
            return Ok(());
        }

        if self.contains_full_message()? {
            return Ok(());
        }

        self.compact()
    }

    /// Move the live region to offset 0.
    fn compact(&mut self) -> Result<()> {
        if self.start == 0 {
            return Ok(());
        }
        let (start, length) = (self.start, self.length);
        self.array
            .as_mut_slice()?
            .copy_within(start..start + length, 0);
        self.start = 0;
        Ok(())
    }

    /// Double the capacity, repeating until the pending frame fits.
    ///
    /// Only the live region is copied; it lands at offset 0. Growth stops at
    /// `4 + extreme_message_size`.
    pub fn grow(&mut self) -> Result<()> {
        let capacity = self.array.len();
        let needed = self.parse_header()?.map_or(0, |size| HEADER_SIZE + size);

        let mut target = capacity.max(1).saturating_mul(2);
        while target < needed {
            target = target.saturating_mul(2);
        }

        let bound = HEADER_SIZE.saturating_add(self.extreme_message_size);
        if target > bound {
            target = bound.max(needed);
        }
        if target <= capacity {
            return Err(WireError::InvalidState("buffer already at maximum size"));
        }

        self.array
            .regrow(target, self.start..self.start + self.length)?;
        self.start = 0;

        tracing::trace!(from = capacity, to = target, "framing buffer grown");
        Ok(())
    }

    /// The live region, `[start, start + length)`.
    pub fn data(&self) -> Result<&[u8]> {
        Ok(&self.array.as_slice()?[self.start..self.start + self.length])
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
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
        self.start = 0;
        self.length = 0;
        self.declared = None;
    }
}
