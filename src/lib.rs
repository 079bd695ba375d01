//! # streamwire
//!
//! Managed duplex byte-stream transport for tokio.
//!
//! Sits directly on an OS connection (TCP, Unix socket, or any
//! `AsyncRead + AsyncWrite`) and offers two modes:
//!
//! - **Raw**: chunks are delivered as read, with classified close reasons
//! - **Messaging**: `[i32 LE length][payload]` frames, exactly one callback
//!   per `send` on the peer
//!
//! ## Architecture
//!
//! - **Buffers**: pooled receive arrays, growable for framing
//! - **Engines**: one per connection, `send` / `listen` / `close`
//! - **Managers**: client (reconnectable) and server lifecycles
//! - **Monitor**: optional symmetric heartbeat with a silence deadline
//!
//! Data-path calls never return errors: sends report [`SendStatus`] and a
//! connection's end is a single [`CloseResult`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamwire::transport::{Endpoint, Listener};
//! use streamwire::{ClientManager, ServerConnection, SocketOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> streamwire::error::Result<()> {
//!     let listener = Listener::bind(&Endpoint::Tcp("127.0.0.1:0".parse().unwrap())).await?;
//!     let endpoint = listener.local_endpoint()?;
//!
//!     let client = ClientManager::new(SocketOptions::messaging());
//!     let cancel = CancellationToken::new();
//!     let (connected, accepted) = tokio::join!(client.connect(&endpoint, &cancel), listener.accept());
//!     connected?;
//!
//!     let server = Arc::new(ServerConnection::start(accepted?, &SocketOptions::messaging()));
//!     server.events().subscribe(|payload| println!("server got {:?}", payload));
//!
//!     client.send(b"hello", &cancel).await;
//!     client.disconnect().await;
//!     server.closed().wait().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod monitor;
pub mod options;
pub mod protocol;
pub mod status;
pub mod transport;

pub use engine::{Engine, FramingEngine, RawEngine};
pub use error::WireError;
pub use events::{Channel, ReceiveEvents, SubscriptionId};
pub use manager::{ClientManager, ClientState, ServerConnection};
pub use monitor::{create_monitor, ConnectionMonitor, HeartbeatMonitor, NoopMonitor};
pub use options::{
    ConnectionMonitorOptions, MonitorKind, SocketMode, SocketOptions, TransportConfig,
};
pub use status::{CloseResult, CloseStatus, CloseWaiter, SendStatus};
