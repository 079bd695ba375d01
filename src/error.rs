//! Error types for streamwire.
//!
//! Data-path operations (`send`, `listen`) never return these directly: they
//! report [`SendStatus`](crate::SendStatus) and
//! [`CloseResult`](crate::CloseResult) instead, and a `WireError` only shows
//! up as the `cause` of a close. Lifecycle operations (connect, bind,
//! configuration) return [`Result`].

use thiserror::Error;

/// Main error type for all streamwire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A peer declared a frame larger than the configured extreme message size.
    #[error("Declared frame size {declared} exceeds maximum {limit}")]
    FrameTooLarge { declared: usize, limit: usize },

    /// A peer sent a length prefix that can never be valid (negative).
    #[error("Malformed frame: declared length {0}")]
    MalformedFrame(i32),

    /// A local payload is too large to be framed.
    #[error("Payload of {len} bytes exceeds maximum {limit}")]
    PayloadTooLarge { len: usize, limit: usize },

    /// A pooled buffer was used after it was returned to the pool.
    #[error("Buffer already disposed")]
    Disposed,

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// `connect` called while a connection is active.
    #[error("Already connected")]
    AlreadyConnected,

    /// `connect` called while another connect attempt is running.
    #[error("Connect already in progress")]
    ConnectInProgress,

    /// A second `listen` loop was started on the same engine.
    #[error("Listen loop already running")]
    AlreadyListening,

    /// The operation was abandoned because its cancellation token fired.
    #[error("Operation canceled")]
    Canceled,

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl WireError {
    /// The underlying I/O error kind, if this is an I/O error.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            WireError::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
