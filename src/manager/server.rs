//! Server-side wrapper for one accepted connection.
//!
//! Starts listening as soon as it is built. There is no reconnect: once
//! disconnected, sends return `Closed` for good.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::buffer::BytePool;
use crate::engine::Engine;
use crate::events::{BoxFuture, Channel, ReceiveEvents};
use crate::options::SocketOptions;
use crate::status::{CloseWaiter, SendStatus};
use crate::transport::BoxedConnection;

/// An accepted connection with its engine running.
pub struct ServerConnection {
    engine: Arc<Engine>,
    events: Arc<ReceiveEvents>,
    session: Mutex<Option<Session>>,
}

impl ServerConnection {
    /// Build the engine for `conn` and spawn its listen loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(conn: BoxedConnection, options: &SocketOptions) -> Self {
        Self::start_with_pool(conn, options, BytePool::shared())
    }

    pub fn start_with_pool(conn: BoxedConnection, options: &SocketOptions, pool: Arc<BytePool>) -> Self {
        let events = Arc::new(ReceiveEvents::new());
        let session = Session::start(Engine::with_pool(conn, options, pool), &events);
        tracing::debug!(connection = session.engine.connection_id(), "server connection started");

        Self {
            engine: Arc::clone(&session.engine),
            events,
            session: Mutex::new(Some(session)),
        }
    }

    pub fn events(&self) -> &ReceiveEvents {
        &self.events
    }

    pub fn connection_id(&self) -> u64 {
        self.engine.connection_id()
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().is_some() && self.engine.is_open()
    }

    pub async fn send(&self, payload: &[u8], cancel: &CancellationToken) -> SendStatus {
        if self.session.lock().is_none() {
            return if cancel.is_cancelled() {
                SendStatus::Canceled
            } else {
                SendStatus::Closed
            };
        }
        self.engine.send(payload, cancel).await
    }

    /// Resolves with how the connection ended.
    pub fn closed(&self) -> CloseWaiter {
        self.engine.closed()
    }

    /// Close the connection and wait for the listen loop. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            let result = session.shutdown().await;
            tracing::debug!(
                connection = self.engine.connection_id(),
                status = %result.status,
                "server connection closed"
            );
        }
    }
}

impl Channel for ServerConnection {
    fn events(&self) -> &ReceiveEvents {
        &self.events
    }

    fn transmit<'a>(
        &'a self,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SendStatus> {
        Box::pin(self.send(payload, cancel))
    }
}
