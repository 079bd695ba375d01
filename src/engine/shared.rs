//! State shared by both engine modes.
//!
//! Owns the split connection, the open flag, the `received` observers and the
//! close signal. The mode-specific engines drive reads and build frames; this
//! type classifies how things ended.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use super::writer::write_all_vectored;
use crate::buffer::BytePool;
use crate::error::WireError;
use crate::events::ReceiveEvents;
use crate::options::SocketOptions;
use crate::status::{CloseResult, CloseSignal, CloseStatus, CloseWaiter, SendStatus};
use crate::transport::BoxedConnection;

pub(crate) type Reader = ReadHalf<BoxedConnection>;
type Writer = WriteHalf<BoxedConnection>;

fn next_connection_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct EngineCore {
    id: u64,
    options: SocketOptions,
    pool: Arc<BytePool>,
    /// Taken by the one listen loop.
    reader: Mutex<Option<Reader>>,
    /// Send-serialization gate.
    writer: tokio::sync::Mutex<Writer>,
    open: AtomicBool,
    closed_locally: AtomicBool,
    /// Fired by `close()`; aborts a send stuck on a peer that stopped reading.
    shutdown: CancellationToken,
    events: ReceiveEvents,
    close: CloseSignal,
}

impl EngineCore {
    pub(crate) fn new(conn: BoxedConnection, options: SocketOptions, pool: Arc<BytePool>) -> Self {
        let (reader, writer) = tokio::io::split(conn);
        let id = next_connection_id();
        tracing::debug!(connection = id, mode = ?options.mode, "engine created");

        Self {
            id,
            options,
            pool,
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(writer),
            open: AtomicBool::new(true),
            closed_locally: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            events: ReceiveEvents::new(),
            close: CloseSignal::new(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn options(&self) -> &SocketOptions {
        &self.options
    }

    #[inline]
    pub(crate) fn pool(&self) -> &Arc<BytePool> {
        &self.pool
    }

    #[inline]
    pub(crate) fn events(&self) -> &ReceiveEvents {
        &self.events
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn closed(&self) -> CloseWaiter {
        self.close.waiter()
    }

    pub(crate) fn close_result(&self) -> Option<CloseResult> {
        self.close.peek()
    }

    /// Write `parts` as one unit under the gate.
    ///
    /// The caller's token is observed only while waiting for the gate; once
    /// the first byte goes out the write runs to completion, fails, or is
    /// abandoned by a local `close()`.
    pub(crate) async fn send_parts(&self, parts: &[&[u8]], cancel: &CancellationToken) -> SendStatus {
        if cancel.is_cancelled() {
            return SendStatus::Canceled;
        }
        if !self.is_open() {
            return SendStatus::Closed;
        }

        let mut writer = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return SendStatus::Closed,
            _ = cancel.cancelled() => return SendStatus::Canceled,
            guard = self.writer.lock() => guard,
        };

        // Closed while we were queued behind another send.
        if !self.is_open() {
            return SendStatus::Closed;
        }

        let written = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::debug!(connection = self.id, "send abandoned by close");
                return SendStatus::Closed;
            }
            written = write_all_vectored(&mut *writer, parts) => written,
        };

        match written {
            Ok(()) => SendStatus::Ok,
            Err(e) => self.send_failed(e),
        }
    }

    fn send_failed(&self, err: io::Error) -> SendStatus {
        self.open.store(false, Ordering::Release);
        if is_peer_gone(err.kind()) || self.closed_locally.load(Ordering::Acquire) {
            tracing::debug!(connection = self.id, error = %err, "send on closed connection");
        } else {
            tracing::warn!(connection = self.id, error = %err, "unexpected send failure");
        }
        SendStatus::Closed
    }

    /// Hand the read half to the one listen loop.
    ///
    /// A second caller gets an `Error` result without disturbing the first.
    pub(crate) fn begin_listen(&self) -> Result<Reader, CloseResult> {
        match self.reader.lock().take() {
            Some(reader) => {
                tracing::debug!(connection = self.id, "listen started");
                Ok(reader)
            }
            None => Err(CloseResult::error(WireError::AlreadyListening)),
        }
    }

    /// Publish the terminal result and mark the engine closed.
    pub(crate) fn finish_listen(&self, result: CloseResult) -> CloseResult {
        self.open.store(false, Ordering::Release);

        match (&result.status, &result.cause) {
            (CloseStatus::Error, Some(cause)) => {
                tracing::warn!(connection = self.id, status = %result.status, cause = %cause, "connection closed");
            }
            (_, Some(cause)) => {
                tracing::debug!(connection = self.id, status = %result.status, cause = %cause, "connection closed");
            }
            (_, None) => {
                tracing::debug!(connection = self.id, status = %result.status, "connection closed");
            }
        }

        self.close.resolve(result.clone());
        result
    }

    /// Result for a zero-byte read.
    pub(crate) fn end_of_stream(&self) -> CloseResult {
        if self.closed_locally.load(Ordering::Acquire) {
            CloseResult::closed_local()
        } else {
            CloseResult::closed_remote()
        }
    }

    /// Result for a failed read.
    pub(crate) fn read_failed(&self, err: io::Error) -> CloseResult {
        if self.closed_locally.load(Ordering::Acquire) {
            return CloseResult::closed_local();
        }
        if is_peer_gone(err.kind()) {
            return CloseResult::closed_remote_with(WireError::Io(err));
        }
        CloseResult::error(WireError::Io(err))
    }

    /// Close from this side.
    ///
    /// Abandons any in-flight send, then shuts down the write half so the
    /// peer sees end-of-stream. A listen loop still running ends with
    /// `ClosedLocal` once its read returns or its token is cancelled; if none
    /// ever started the signal resolves here.
    pub(crate) async fn close(&self) {
        self.closed_locally.store(true, Ordering::Release);
        let was_open = self.open.swap(false, Ordering::AcqRel);
        self.shutdown.cancel();

        if was_open {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(connection = self.id, error = %e, "shutdown failed");
            }
        }

        let never_listened = self.reader.lock().take().is_some();
        if never_listened {
            self.finish_listen(CloseResult::closed_local());
        }
    }
}

/// Faults that mean the peer went away rather than something broke.
fn is_peer_gone(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}
