//! Receive buffers.
//!
//! - [`BytePool`] - shared arrays rented per listen loop
//! - [`RawBuffer`] - one read's worth of bytes, no framing
//! - [`FramingBuffer`] - accumulates partial reads into length-prefixed frames

mod framing;
mod pool;
mod raw;

pub use framing::FramingBuffer;
pub use pool::{BytePool, PooledArray, DEFAULT_MAX_RETAINED, DEFAULT_MAX_RETAINED_LEN};
pub use raw::RawBuffer;
