//! Protocol module - the messaging-mode wire format.
//!
//! - 4-byte little-endian signed length prefix
//! - Heartbeat payload constant shared by engines and the monitor

mod wire_format;

pub use wire_format::{
    build_frame, decode_header, encode_header, is_heartbeat, validate_declared, HEADER_SIZE,
    HEARTBEAT, HEARTBEAT_FRAME,
};
