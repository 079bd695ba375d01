//! Lifecycle wrappers pairing a connection with an engine.
//!
//! - [`ClientManager`] - connect, disconnect, reconnect
//! - [`ServerConnection`] - one accepted connection, terminal after disconnect
//!
//! Both re-dispatch the current engine's payloads through their own
//! [`ReceiveEvents`], so subscriptions survive reconnects.

mod client;
mod server;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use client::{ClientManager, ClientState};
pub use server::ServerConnection;

use crate::engine::Engine;
use crate::error::WireError;
use crate::events::{ReceiveEvents, SubscriptionId};
use crate::status::CloseResult;

/// One engine with its running listen loop.
struct Session {
    engine: Arc<Engine>,
    forwarder: SubscriptionId,
    cancel: CancellationToken,
    listen: JoinHandle<CloseResult>,
}

impl Session {
    /// Forward `engine`'s payloads into `events` and spawn its listen loop.
    fn start(engine: Engine, events: &Arc<ReceiveEvents>) -> Self {
        let engine = Arc::new(engine);

        let target = Arc::clone(events);
        let forwarder = engine
            .events()
            .subscribe(move |payload| target.dispatch(payload));

        let cancel = CancellationToken::new();
        let listen = tokio::spawn({
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            async move { engine.listen(&cancel).await }
        });

        Self {
            engine,
            forwarder,
            cancel,
            listen,
        }
    }

    /// The listen loop ended on its own (peer closed, protocol error).
    fn is_finished(&self) -> bool {
        self.listen.is_finished()
    }

    /// Unsubscribe, close, cancel and wait for the listen loop.
    async fn shutdown(self) -> CloseResult {
        self.engine.events().unsubscribe(self.forwarder);
        self.engine.close().await;
        self.cancel.cancel();

        match self.listen.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(connection = self.engine.connection_id(), error = %e, "listen task failed");
                CloseResult::error(WireError::Io(e.into()))
            }
        }
    }
}
