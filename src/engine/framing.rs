//! Message-framing engine.
//!
//! Each `send` becomes one `[i32 LE length][payload]` frame, written whole
//! under the send gate. The receive side reassembles frames across arbitrary
//! read boundaries and delivers each payload exactly once.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use streamwire::engine::FramingEngine;
//! use streamwire::options::SocketOptions;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (a, b) = tokio::io::duplex(1024);
//! let left = FramingEngine::new(Box::new(a), &SocketOptions::messaging());
//! let right = Arc::new(FramingEngine::new(Box::new(b), &SocketOptions::messaging()));
//! let (_id, mut inbox) = right.events().subscribe_stream();
//!
//! let cancel = CancellationToken::new();
//! let listener = tokio::spawn({
//!     let (right, cancel) = (right.clone(), cancel.clone());
//!     async move { right.listen(&cancel).await }
//! });
//!
//! assert!(left.send(b"hello", &cancel).await.is_ok());
//! assert_eq!(&inbox.recv().await.unwrap()[..], b"hello");
//!
//! cancel.cancel();
//! listener.await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::shared::{EngineCore, Reader};
use crate::buffer::{BytePool, FramingBuffer};
use crate::events::{BoxFuture, Channel, ReceiveEvents};
use crate::options::SocketOptions;
use crate::protocol::encode_header;
use crate::status::{CloseResult, CloseWaiter, SendStatus};
use crate::transport::BoxedConnection;

/// Engine that speaks length-prefixed frames.
pub struct FramingEngine {
    core: EngineCore,
}

impl FramingEngine {
    /// Wrap `conn`, renting receive buffers from the shared pool.
    pub fn new(conn: BoxedConnection, options: &SocketOptions) -> Self {
        Self::with_pool(conn, options, BytePool::shared())
    }

    pub fn with_pool(conn: BoxedConnection, options: &SocketOptions, pool: Arc<BytePool>) -> Self {
        Self {
            core: EngineCore::new(conn, options.clone(), pool),
        }
    }

    /// Send one message.
    ///
    /// The peer's subscribers see exactly this payload in one callback.
    /// Payloads above the extreme message size are refused with `Closed`
    /// before anything is written; the connection stays usable.
    pub async fn send(&self, payload: &[u8], cancel: &CancellationToken) -> SendStatus {
        if cancel.is_cancelled() {
            return SendStatus::Canceled;
        }

        let limit = self.core.options().extreme_message_size;
        if payload.len() > limit {
            tracing::warn!(
                connection = self.core.id(),
                len = payload.len(),
                limit,
                "refusing to send oversized message"
            );
            return SendStatus::Closed;
        }

        let header = match encode_header(payload.len()) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(connection = self.core.id(), error = %e, "cannot frame payload");
                return SendStatus::Closed;
            }
        };

        self.core.send_parts(&[header.as_slice(), payload], cancel).await
    }

    /// Read frames until the stream ends, delivering each payload.
    ///
    /// Ends with `Error` on an oversized or malformed length prefix. Runs at
    /// most once per engine.
    pub async fn listen(&self, cancel: &CancellationToken) -> CloseResult {
        let mut reader = match self.core.begin_listen() {
            Ok(reader) => reader,
            Err(rejected) => return rejected,
        };

        let options = self.core.options();
        let mut buffer = FramingBuffer::new(
            self.core.pool(),
            options.buffer_size,
            options.extreme_message_size,
        );
        let result = self.receive(&mut reader, &mut buffer, cancel).await;
        buffer.dispose();

        self.core.finish_listen(result)
    }

    async fn receive(
        &self,
        reader: &mut Reader,
        buffer: &mut FramingBuffer,
        cancel: &CancellationToken,
    ) -> CloseResult {
        loop {
            if cancel.is_cancelled() {
                return CloseResult::closed_local();
            }

            if buffer.is_full() {
                if let Err(e) = buffer.grow() {
                    return CloseResult::error(e);
                }
            }

            let free = match buffer.free_space() {
                Ok(free) => free,
                Err(e) => return CloseResult::error(e),
            };

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CloseResult::closed_local(),
                read = reader.read(free) => read,
            };

            let n = match read {
                Ok(0) => return self.core.end_of_stream(),
                Ok(n) => n,
                Err(e) => return self.core.read_failed(e),
            };

            if let Err(e) = buffer.track_written(n) {
                return CloseResult::error(e);
            }
            if let Err(e) = self.drain(buffer) {
                return CloseResult::error(e);
            }
        }
    }

    /// Deliver every complete frame currently held.
    fn drain(&self, buffer: &mut FramingBuffer) -> crate::error::Result<()> {
        while buffer.contains_full_message()? {
            self.core.events().dispatch(buffer.message()?);
            buffer.reset()?;
        }
        Ok(())
    }

    /// Close from this side; see [`Engine::close`](super::Engine::close).
    pub async fn close(&self) {
        self.core.close().await;
    }

    pub fn closed(&self) -> CloseWaiter {
        self.core.closed()
    }

    pub fn events(&self) -> &ReceiveEvents {
        self.core.events()
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    pub fn connection_id(&self) -> u64 {
        self.core.id()
    }
}

impl Channel for FramingEngine {
    fn events(&self) -> &ReceiveEvents {
        self.core.events()
    }

    fn transmit<'a>(
        &'a self,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SendStatus> {
        Box::pin(self.send(payload, cancel))
    }
}
