//! Receive-side observer lists.
//!
//! Every engine and manager owns a [`ReceiveEvents`]. Payloads are offered to
//! interceptors first (the connection monitor uses one to swallow heartbeats),
//! then to plain subscribers. Handlers are synchronous and get a borrowed view
//! of the receive buffer; copy it if you need it later, or use
//! [`ReceiveEvents::subscribe_stream`] to get owned [`Bytes`] on a channel.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use streamwire::events::ReceiveEvents;
//!
//! let events = ReceiveEvents::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//!
//! let counter = seen.clone();
//! let id = events.subscribe(move |payload| {
//!     counter.fetch_add(payload.len(), Ordering::SeqCst);
//! });
//!
//! events.dispatch(b"abc");
//! events.unsubscribe(id);
//! events.dispatch(b"ignored");
//!
//! assert_eq!(seen.load(Ordering::SeqCst), 3);
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::status::SendStatus;

/// Boxed future used at the object-safe seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler for a received payload.
pub type ReceivedHandler = dyn Fn(&[u8]) + Send + Sync;

/// Handler that may consume a payload before subscribers see it.
///
/// Returns `true` when the payload was consumed.
pub type Interceptor = dyn Fn(&[u8]) -> bool + Send + Sync;

/// Opaque handle returned by every `subscribe`-style call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SubscriptionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Copy-on-write list of handlers.
///
/// Dispatch takes a snapshot and calls handlers outside the lock, so a handler
/// may subscribe or unsubscribe without deadlocking.
pub struct Subscribers<F: ?Sized> {
    entries: RwLock<Arc<Vec<(SubscriptionId, Arc<F>)>>>,
}

impl<F: ?Sized> Subscribers<F> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn add(&self, handler: Arc<F>) -> SubscriptionId {
        let id = SubscriptionId::next();
        let mut entries = self.entries.write();
        let mut next = Vec::clone(&entries);
        next.push((id, handler));
        *entries = Arc::new(next);
        id
    }

    /// Returns `false` if `id` was not registered here.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(entry, _)| *entry == id) {
            return false;
        }
        let next = entries
            .iter()
            .filter(|(entry, _)| *entry != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    /// Handlers registered right now, in registration order.
    pub fn snapshot(&self) -> Arc<Vec<(SubscriptionId, Arc<F>)>> {
        Arc::clone(&self.entries.read())
    }

    pub fn clear(&self) {
        *self.entries.write() = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: ?Sized> Default for Subscribers<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> fmt::Debug for Subscribers<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

/// The `received` event of one engine or manager.
#[derive(Debug, Default)]
pub struct ReceiveEvents {
    interceptors: Subscribers<Interceptor>,
    subscribers: Subscribers<ReceivedHandler>,
}

impl ReceiveEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` with every payload no interceptor consumed.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(handler))
    }

    /// Offer every payload to `handler` before any subscriber.
    pub fn intercept<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.interceptors.add(Arc::new(handler))
    }

    /// Forward owned copies of every payload to a channel.
    ///
    /// The sender is dropped when the subscription is removed.
    pub fn subscribe_stream(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |payload| {
            let _ = tx.send(Bytes::copy_from_slice(payload));
        });
        (id, rx)
    }

    /// Remove a subscriber or an interceptor.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id) || self.interceptors.remove(id)
    }

    /// Deliver one payload.
    pub fn dispatch(&self, payload: &[u8]) {
        for (_, interceptor) in self.interceptors.snapshot().iter() {
            if interceptor(payload) {
                return;
            }
        }
        for (_, handler) in self.subscribers.snapshot().iter() {
            handler(payload);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    pub fn clear(&self) {
        self.interceptors.clear();
        self.subscribers.clear();
    }
}

/// Send and receive surface shared by engines and managers.
///
/// The connection monitor decorates any `Channel` without knowing whether it
/// sits on a raw engine, a framing engine or a manager.
pub trait Channel: Send + Sync {
    fn events(&self) -> &ReceiveEvents;

    fn transmit<'a>(
        &'a self,
        payload: &'a [u8],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SendStatus>;
}
