//! Wire format encoding and decoding.
//!
//! Messaging mode prefixes every payload with its length:
//! ```text
//! ┌──────────────┬───────────────────┐
//! │ Length N     │ Payload           │
//! │ 4 bytes      │ N bytes           │
//! │ int32 LE     │                   │
//! └──────────────┴───────────────────┘
//! ```
//!
//! There is no checksum and no message type byte.

use crate::error::{Result, WireError};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Payload of a heartbeat frame.
///
/// At the framing layer it is indistinguishable from a one-byte application
/// message; the connection monitor consumes it before subscribers see it.
pub const HEARTBEAT: u8 = 0xFF;

/// Heartbeat payload as a slice.
pub const HEARTBEAT_FRAME: &[u8] = &[HEARTBEAT];

/// Encode a payload length as a 4-byte little-endian header.
///
/// # Example
///
/// ```
/// use streamwire::protocol::encode_header;
///
/// assert_eq!(encode_header(5).unwrap(), [5, 0, 0, 0]);
/// ```
///
/// # Errors
///
/// Returns `PayloadTooLarge` if `len` does not fit a signed 32-bit length.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_SIZE]> {
    let declared = i32::try_from(len).map_err(|_| WireError::PayloadTooLarge {
        len,
        limit: i32::MAX as usize,
    })?;
    Ok(declared.to_le_bytes())
}

/// Decode the declared length from the first 4 bytes.
///
/// Returns `None` if the buffer is too short. The value is signed; callers
/// decide what a negative length means.
///
/// # Example
///
/// ```
/// use streamwire::protocol::decode_header;
///
/// assert_eq!(decode_header(&[0x10, 0x27, 0, 0, 0xAA]), Some(10_000));
/// assert_eq!(decode_header(&[1, 2]), None);
/// ```
pub fn decode_header(buf: &[u8]) -> Option<i32> {
    let bytes: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(i32::from_le_bytes(bytes))
}

/// Validate a declared length against the extreme message size.
///
/// # Errors
///
/// - `MalformedFrame` for negative lengths
/// - `FrameTooLarge` when the length exceeds `limit`
pub fn validate_declared(declared: i32, limit: usize) -> Result<usize> {
    let size = usize::try_from(declared).map_err(|_| WireError::MalformedFrame(declared))?;
    if size > limit {
        return Err(WireError::FrameTooLarge {
            declared: size,
            limit,
        });
    }
    Ok(size)
}

/// Build a complete frame as a single byte vector.
///
/// The engines write header and payload with vectored I/O instead; this is
/// for tests and callers that need the encoded bytes.
///
/// # Example
///
/// ```
/// use streamwire::protocol::{build_frame, HEADER_SIZE};
///
/// let bytes = build_frame(b"hello").unwrap();
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// assert_eq!(&bytes[HEADER_SIZE..], b"hello");
/// ```
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let header = encode_header(payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Check whether a received payload is a heartbeat.
#[inline]
pub fn is_heartbeat(payload: &[u8]) -> bool {
    payload == HEARTBEAT_FRAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_little_endian() {
        let header = encode_header(0x0102_0304).unwrap();
        assert_eq!(header, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_encode_rejects_oversized_length() {
        let result = encode_header(i32::MAX as usize + 1);
        assert!(matches!(result, Err(WireError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_negative_length() {
        let bytes = (-1i32).to_le_bytes();
        assert_eq!(decode_header(&bytes), Some(-1));
    }

    #[test]
    fn test_validate_declared() {
        assert_eq!(validate_declared(0, 10).unwrap(), 0);
        assert_eq!(validate_declared(10, 10).unwrap(), 10);

        let too_large = validate_declared(11, 10).unwrap_err();
        assert!(too_large.to_string().contains("exceeds maximum"));

        assert!(matches!(
            validate_declared(-5, 10),
            Err(WireError::MalformedFrame(-5))
        ));
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let bytes = build_frame(b"").unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_heartbeat_detection() {
        assert!(is_heartbeat(&[0xFF]));
        assert!(!is_heartbeat(&[0xFF, 0xFF]));
        assert!(!is_heartbeat(&[0x00]));
        assert!(!is_heartbeat(&[]));
    }
}
