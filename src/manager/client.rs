//! Client-side connection manager.
//!
//! Lifecycle:
//! 1. `connect` opens a connection and builds a fresh engine for it
//! 2. the engine's listen loop runs in a spawned task
//! 3. `disconnect` tears it down and returns to `Disconnected`
//! 4. `connect` may be called again on the same manager
//!
//! # Example
//!
//! ```no_run
//! use streamwire::manager::ClientManager;
//! use streamwire::options::SocketOptions;
//! use streamwire::transport::Endpoint;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> streamwire::error::Result<()> {
//! let client = ClientManager::new(SocketOptions::messaging());
//! client.events().subscribe(|payload| println!("got {} bytes", payload.len()));
//!
//! let cancel = CancellationToken::new();
//! client.connect(&Endpoint::Tcp("127.0.0.1:7000".parse().unwrap()), &cancel).await?;
//! client.send(b"hello", &cancel).await;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::buffer::BytePool;
use crate::engine::Engine;
use crate::error::{Result, WireError};
use crate::events::{BoxFuture, Channel, ReceiveEvents};
use crate::options::SocketOptions;
use crate::status::{CloseResult, CloseSignal, CloseWaiter, SendStatus};
use crate::transport::{self, BoxedConnection, Endpoint};

/// Where a [`ClientManager`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    state: ClientState,
    session: Option<Session>,
}

/// Reconnectable client connection.
pub struct ClientManager {
    options: SocketOptions,
    pool: Arc<BytePool>,
    events: Arc<ReceiveEvents>,
    inner: Mutex<Inner>,
    /// Answer for `closed()` before the first connection.
    never_connected: CloseSignal,
}

impl ClientManager {
    pub fn new(options: SocketOptions) -> Self {
        Self::with_pool(options, BytePool::shared())
    }

    pub fn with_pool(options: SocketOptions, pool: Arc<BytePool>) -> Self {
        Self {
            options,
            pool,
            events: Arc::new(ReceiveEvents::new()),
            inner: Mutex::new(Inner {
                state: ClientState::Disconnected,
                session: None,
            }),
            never_connected: CloseSignal::resolved(CloseResult::closed_local()),
        }
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Payloads from every connection this manager has made.
    pub fn events(&self) -> &ReceiveEvents {
        &self.events
    }

    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` / `ConnectInProgress` if not disconnected
    /// - `Canceled` if `cancel` fires before the connection is open
    /// - the I/O error of a failed connect
    ///
    /// On error the manager stays `Disconnected`.
    pub async fn connect(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<()> {
        self.begin_connect().await?;

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WireError::Canceled),
            conn = transport::connect(endpoint) => conn,
        };

        match connected {
            Ok(conn) => self.attach(conn),
            Err(e) => {
                tracing::debug!(%endpoint, error = %e, "connect failed");
                self.abort_connect();
                Err(e)
            }
        }
    }

    /// Attach an already-open connection, e.g. an in-memory duplex stream.
    pub async fn connect_stream(&self, conn: BoxedConnection) -> Result<()> {
        self.begin_connect().await?;
        self.attach(conn)
    }

    /// Check the state, move to `Connecting` and drop a stale session.
    async fn begin_connect(&self) -> Result<()> {
        let stale = {
            let mut inner = self.inner.lock();
            match inner.state {
                ClientState::Connecting => return Err(WireError::ConnectInProgress),
                ClientState::Connected => {
                    let ended = inner
                        .session
                        .as_ref()
                        .map_or(true, |s| s.is_finished() || !s.engine.is_open());
                    if !ended {
                        return Err(WireError::AlreadyConnected);
                    }
                }
                ClientState::Disconnected => {}
            }
            inner.state = ClientState::Connecting;
            inner.session.take()
        };

        if let Some(session) = stale {
            tracing::debug!(
                connection = session.engine.connection_id(),
                "discarding ended connection"
            );
            session.shutdown().await;
        }
        Ok(())
    }

    fn abort_connect(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ClientState::Connecting {
            inner.state = ClientState::Disconnected;
        }
    }

    fn attach(&self, conn: BoxedConnection) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ClientState::Connecting {
            // `disconnect` ran while we were connecting; `conn` drops here.
            return Err(WireError::InvalidState("disconnected while connecting"));
        }

        let engine = Engine::with_pool(conn, &self.options, Arc::clone(&self.pool));
        tracing::debug!(connection = engine.connection_id(), "client connected");

        inner.session = Some(Session::start(engine, &self.events));
        inner.state = ClientState::Connected;
        Ok(())
    }

    fn current_engine(&self) -> Option<Arc<Engine>> {
        let inner = self.inner.lock();
        inner.session.as_ref().map(|s| Arc::clone(&s.engine))
    }

    /// Send through the current connection, or `Closed` if there is none.
    pub async fn send(&self, payload: &[u8], cancel: &CancellationToken) -> SendStatus {
        match self.current_engine() {
            Some(engine) => engine.send(payload, cancel).await,
            None if cancel.is_cancelled() => SendStatus::Canceled,
            None => SendStatus::Closed,
        }
    }

    /// Resolves with how the current connection ended.
    ///
    /// Before any connection this is already `ClosedLocal`.
    pub fn closed(&self) -> CloseWaiter {
        match self.current_engine() {
            Some(engine) => engine.closed(),
            None => self.never_connected.waiter(),
        }
    }

    /// Close the current connection and wait for its listen loop to end.
    ///
    /// Safe to call in any state. Afterwards `connect` may be called again.
    pub async fn disconnect(&self) {
        let session = {
            let mut inner = self.inner.lock();
            inner.state = ClientState::Disconnected;
            inner.session.take()
        };

        if let Some(session) = session {
            let connection = session.engine.connection_id();
            let result = session.shutdown().await;
            tracing::debug!(connection, status = %result.status, "client disconnected");
        }
    }
}

impl Channel for ClientManager {
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    use crate::engine::FramingEngine;
    use crate::status::CloseStatus;
    use crate::transport::Listener;

    #[tokio::test]
    async fn test_initial_state() {
        let client = ClientManager::new(SocketOptions::messaging());

        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(
            client.send(b"x", &CancellationToken::new()).await,
            SendStatus::Closed
        );
        assert_eq!(client.closed().wait().await.status, CloseStatus::ClosedLocal);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let client = ClientManager::new(SocketOptions::messaging());
        let (a, _b) = duplex(1024);
        let (c, _d) = duplex(1024);

        client.connect_stream(Box::new(a)).await.unwrap();
        let second = client.connect_stream(Box::new(c)).await;

        assert!(matches!(second, Err(WireError::AlreadyConnected)));
        assert!(client.is_connected());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let client = ClientManager::new(SocketOptions::messaging());

        let result = client
            .connect(&Endpoint::Tcp(addr), &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_canceled_connect() {
        let client = ClientManager::new(SocketOptions::messaging());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client
            .connect(&Endpoint::Tcp("127.0.0.1:9".parse().unwrap()), &cancel)
            .await;

        assert!(matches!(result, Err(WireError::Canceled)));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_payloads_are_forwarded() {
        let client = ClientManager::new(SocketOptions::messaging());
        let (_id, mut inbox) = client.events().subscribe_stream();
        let (a, b) = duplex(1024);
        client.connect_stream(Box::new(a)).await.unwrap();

        let peer = FramingEngine::new(Box::new(b), &SocketOptions::messaging());
        assert!(peer.send(b"from peer", &CancellationToken::new()).await.is_ok());

        assert_eq!(&inbox.recv().await.unwrap()[..], b"from peer");
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_resolves_local() {
        let client = ClientManager::new(SocketOptions::messaging());
        let (a, _b) = duplex(1024);
        client.connect_stream(Box::new(a)).await.unwrap();
        let closed = client.closed();

        client.disconnect().await;

        assert_eq!(closed.wait().await.status, CloseStatus::ClosedLocal);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(
            client.send(b"x", &CancellationToken::new()).await,
            SendStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_stale_connection_is_replaced() {
        let client = ClientManager::new(SocketOptions::messaging());
        let (a, mut b) = duplex(1024);
        client.connect_stream(Box::new(a)).await.unwrap();
        let closed = client.closed();

        // Peer goes away; the listen loop ends on its own.
        b.shutdown().await.unwrap();
        drop(b);
        assert_eq!(closed.wait().await.status, CloseStatus::ClosedRemote);
        tokio::task::yield_now().await;

        let (c, _d) = duplex(1024);
        client.connect_stream(Box::new(c)).await.unwrap();
        assert!(client.is_connected());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_over_tcp() {
        let listener = Listener::bind(&Endpoint::Tcp("127.0.0.1:0".parse().unwrap()))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        let cancel = CancellationToken::new();
        let client = ClientManager::new(SocketOptions::messaging());

        // First connection: text.
        let (connected, accepted) = tokio::join!(client.connect(&endpoint, &cancel), listener.accept());
        connected.unwrap();
        let server = Arc::new(FramingEngine::new(accepted.unwrap(), &SocketOptions::messaging()));
        let (_id, mut inbox) = server.events().subscribe_stream();
        let first = {
            let (server, cancel) = (server.clone(), cancel.clone());
            tokio::spawn(async move { server.listen(&cancel).await })
        };

        assert_eq!(client.send("hello".as_bytes(), &cancel).await, SendStatus::Ok);
        assert_eq!(&inbox.recv().await.unwrap()[..], b"hello");

        client.disconnect().await;
        assert_eq!(first.await.unwrap().status, CloseStatus::ClosedRemote);

        // Second connection on the same manager: binary.
        let (connected, accepted) = tokio::join!(client.connect(&endpoint, &cancel), listener.accept());
        connected.unwrap();
        let server = Arc::new(FramingEngine::new(accepted.unwrap(), &SocketOptions::messaging()));
        let (_id, mut inbox) = server.events().subscribe_stream();
        let second = {
            let (server, cancel) = (server.clone(), cancel.clone());
            tokio::spawn(async move { server.listen(&cancel).await })
        };

        let binary = [0u8, 1, 2, 0xFE, 0xFF, 0x80];
        assert_eq!(client.send(&binary, &cancel).await, SendStatus::Ok);
        assert_eq!(&inbox.recv().await.unwrap()[..], &binary);

        client.disconnect().await;
        assert_eq!(second.await.unwrap().status, CloseStatus::ClosedRemote);
    }

    #[tokio::test]
    async fn test_disconnect_with_stalled_send() {
        let client = Arc::new(ClientManager::new(SocketOptions::messaging()));
        // Peer end stays open but is never read.
        let (a, _peer) = duplex(64);
        client.connect_stream(Box::new(a)).await.unwrap();
        let closed = client.closed();

        let stalled = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send(&[1u8; 4096], &CancellationToken::new()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!stalled.is_finished());

        tokio::time::timeout(std::time::Duration::from_secs(2), client.disconnect())
            .await
            .expect("disconnect must finish while a send is blocked");

        assert_eq!(stalled.await.unwrap(), SendStatus::Closed);
        assert_eq!(closed.wait().await.status, CloseStatus::ClosedLocal);
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}
