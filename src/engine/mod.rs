//! Engines bound 1:1 to a connection.
//!
//! - [`RawEngine`] - chunks in, chunks out
//! - [`FramingEngine`] - one `send` is one `received` on the peer
//!
//! [`Engine`] picks one from [`SocketOptions::mode`]. An engine cannot be
//! reused once its connection has closed; managers build a fresh one per
//! connection.

mod framing;
mod raw;
mod shared;
mod writer;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use framing::FramingEngine;
pub use raw::RawEngine;

use crate::buffer::BytePool;
use crate::events::{BoxFuture, Channel, ReceiveEvents};
use crate::options::{SocketMode, SocketOptions};
use crate::status::{CloseResult, CloseWaiter, SendStatus};
use crate::transport::BoxedConnection;

/// Either engine, chosen at construction.
pub enum Engine {
    Raw(RawEngine),
    Framing(FramingEngine),
}

impl Engine {
    pub fn new(conn: BoxedConnection, options: &SocketOptions) -> Self {
        Self::with_pool(conn, options, BytePool::shared())
    }

    pub fn with_pool(conn: BoxedConnection, options: &SocketOptions, pool: Arc<BytePool>) -> Self {
        match options.mode {
            SocketMode::Raw => Engine::Raw(RawEngine::with_pool(conn, options, pool)),
            SocketMode::Messaging => Engine::Framing(FramingEngine::with_pool(conn, options, pool)),
        }
    }

    pub fn mode(&self) -> SocketMode {
        match self {
            Engine::Raw(_) => SocketMode::Raw,
            Engine::Framing(_) => SocketMode::Messaging,
        }
    }

    /// Send bytes (raw) or one message (messaging).
    ///
    /// Never fails: faults become `Closed`.
    pub async fn send(&self, payload: &[u8], cancel: &CancellationToken) -> SendStatus {
        match self {
            Engine::Raw(engine) => engine.send(payload, cancel).await,
            Engine::Framing(engine) => engine.send(payload, cancel).await,
        }
    }

    /// Run the receive loop until the connection ends.
    pub async fn listen(&self, cancel: &CancellationToken) -> CloseResult {
        match self {
            Engine::Raw(engine) => engine.listen(cancel).await,
            Engine::Framing(engine) => engine.listen(cancel).await,
        }
    }

    /// Close from this side.
    ///
    /// The peer sees end-of-stream; further sends return `Closed`. A running
    /// listen loop reports `ClosedLocal`.
    pub async fn close(&self) {
        match self {
            Engine::Raw(engine) => engine.close().await,
            Engine::Framing(engine) => engine.close().await,
        }
    }

    /// Resolves once with how the connection ended.
    pub fn closed(&self) -> CloseWaiter {
        match self {
            Engine::Raw(engine) => engine.closed(),
            Engine::Framing(engine) => engine.closed(),
        }
    }

    pub fn events(&self) -> &ReceiveEvents {
        match self {
            Engine::Raw(engine) => engine.events(),
            Engine::Framing(engine) => engine.events(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Engine::Raw(engine) => engine.is_open(),
            Engine::Framing(engine) => engine.is_open(),
        }
    }

    /// Numeric id carried as the `connection` field in logs.
    pub fn connection_id(&self) -> u64 {
        match self {
            Engine::Raw(engine) => engine.connection_id(),
            Engine::Framing(engine) => engine.connection_id(),
        }
    }
}

impl Channel for Engine {
    fn events(&self) -> &ReceiveEvents {
        Engine::events(self)
    }

    fn transmit<'a>(
        &'a self,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SendStatus> {
        Box::pin(self.send(payload, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::CloseStatus;

    #[tokio::test]
    async fn test_mode_selects_engine() {
        let (a, _a) = tokio::io::duplex(64);
        let (b, _b) = tokio::io::duplex(64);

        let raw = Engine::new(Box::new(a), &SocketOptions::raw());
        let framing = Engine::new(Box::new(b), &SocketOptions::messaging());

        assert_eq!(raw.mode(), SocketMode::Raw);
        assert_eq!(framing.mode(), SocketMode::Messaging);
        assert_ne!(raw.connection_id(), framing.connection_id());
    }

    #[tokio::test]
    async fn test_raw_peer_sees_framing_bytes() {
        let (a, b) = tokio::io::duplex(1024);
        let framing = Engine::new(Box::new(a), &SocketOptions::messaging());
        let raw = Arc::new(Engine::new(Box::new(b), &SocketOptions::raw()));
        let (_id, mut inbox) = raw.events().subscribe_stream();

        let cancel = CancellationToken::new();
        let listener = {
            let (raw, cancel) = (raw.clone(), cancel.clone());
            tokio::spawn(async move { raw.listen(&cancel).await })
        };

        assert_eq!(framing.send(b"hi", &cancel).await, SendStatus::Ok);
        framing.close().await;

        let mut bytes = Vec::new();
        while let Some(chunk) = inbox.recv().await {
            bytes.extend_from_slice(&chunk);
            if bytes.len() >= 6 {
                break;
            }
        }
        assert_eq!(bytes, vec![2, 0, 0, 0, b'h', b'i']);
        assert_eq!(listener.await.unwrap().status, CloseStatus::ClosedRemote);
        assert_eq!(framing.closed().wait().await.status, CloseStatus::ClosedLocal);
    }
}
