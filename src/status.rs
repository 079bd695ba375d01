//! Outcome types for sends and connection lifetimes.
//!
//! - [`SendStatus`] is returned by every send. Closed and canceled sends are
//!   ordinary outcomes, not errors.
//! - [`CloseResult`] is the terminal value of a receive loop, published once
//!   through a [`CloseSignal`] and observable by any number of waiters.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::WireError;

/// Outcome of a single send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendStatus {
    /// The bytes were handed to the connection.
    Ok,
    /// The connection is not open (or closed while sending).
    Closed,
    /// The cancellation token was already triggered.
    Canceled,
}

impl SendStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == SendStatus::Ok
    }
}

/// Why a receive loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// This side ended the connection, including cancelling the loop.
    ClosedLocal,
    /// The peer ended the byte stream.
    ClosedRemote,
    /// Protocol violation or unexpected I/O fault.
    Error,
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseStatus::ClosedLocal => "closed-local",
            CloseStatus::ClosedRemote => "closed-remote",
            CloseStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Terminal value of a connection's receive loop.
///
/// Cheap to clone; the cause is shared.
#[derive(Debug, Clone)]
pub struct CloseResult {
    pub status: CloseStatus,
    pub cause: Option<Arc<WireError>>,
}

impl CloseResult {
    pub fn closed_local() -> Self {
        Self {
            status: CloseStatus::ClosedLocal,
            cause: None,
        }
    }

    pub fn closed_remote() -> Self {
        Self {
            status: CloseStatus::ClosedRemote,
            cause: None,
        }
    }

    /// Remote close with the fault that revealed it (reset, abort).
    pub fn closed_remote_with(cause: WireError) -> Self {
        Self {
            status: CloseStatus::ClosedRemote,
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn error(cause: WireError) -> Self {
        Self {
            status: CloseStatus::Error,
            cause: Some(Arc::new(cause)),
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.status == CloseStatus::Error
    }
}

/// Single-resolution publisher for a [`CloseResult`].
///
/// The first `resolve` wins; later calls are ignored. Waiters that subscribe
/// after resolution see the stored value immediately.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<Option<CloseResult>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// A signal that is already resolved, used for "never connected".
    pub fn resolved(result: CloseResult) -> Self {
        let (tx, _rx) = watch::channel(Some(result));
        Self { tx }
    }

    /// Publish the result. Returns `false` if it was already resolved.
    pub fn resolve(&self, result: CloseResult) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Current value without waiting.
    pub fn peek(&self) -> Option<CloseResult> {
        (*self.tx.borrow()).clone()
    }

    /// A future-like handle that resolves once the result is published.
    pub fn waiter(&self) -> CloseWaiter {
        CloseWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `closed()` on engines and managers.
#[derive(Debug, Clone)]
pub struct CloseWaiter {
    rx: watch::Receiver<Option<CloseResult>>,
}

impl CloseWaiter {
    /// Wait for the close result.
    ///
    /// If the publishing side was dropped without resolving, the connection
    /// is reported as closed locally.
    pub async fn wait(mut self) -> CloseResult {
        if let Ok(value) = self.rx.wait_for(Option::is_some).await {
            if let Some(result) = value.as_ref() {
                return result.clone();
            }
        }
        let current = (*self.rx.borrow()).clone();
        current.unwrap_or_else(CloseResult::closed_local)
    }
}
