//! Connection liveness monitoring.
//!
//! The heartbeat monitor decorates any [`Channel`]: every `ping_interval` it
//! sends a one-byte heartbeat frame, and it swallows heartbeats arriving from
//! the peer before application subscribers see them. When nothing has been
//! heard from the peer for longer than `max_ping_delay`, `connection_lost`
//! fires once and checking stops until the monitor is started again.
//!
//! Both ends run the same monitor; there is no ping/pong pairing. Only
//! heartbeats received from the peer reset the silence clock, so a monitor
//! whose peer runs none reports the connection lost.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use streamwire::manager::ClientManager;
//! use streamwire::monitor::create_monitor;
//! use streamwire::options::{ConnectionMonitorOptions, SocketOptions};
//!
//! # fn run(client: Arc<ClientManager>) {
//! let monitor = create_monitor(&ConnectionMonitorOptions::heartbeat(
//!     Duration::from_secs(1),
//!     Duration::from_secs(5),
//! ));
//! monitor.on_connection_lost(Arc::new(|| eprintln!("peer went silent")));
//! monitor.start(client);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::{Channel, Subscribers, SubscriptionId};
use crate::options::{ConnectionMonitorOptions, MonitorKind};
use crate::protocol::{is_heartbeat, HEARTBEAT_FRAME};

/// Handler for the `connection_lost` event.
pub type LostHandler = dyn Fn() + Send + Sync;

/// Liveness monitor layered over a [`Channel`].
pub trait ConnectionMonitor: Send + Sync {
    /// Begin monitoring `channel`, replacing any previous one.
    fn start(&self, channel: Arc<dyn Channel>);

    /// Stop sending heartbeats and release the channel's received event.
    fn stop(&self);

    fn on_connection_lost(&self, handler: Arc<LostHandler>) -> SubscriptionId;

    fn remove_connection_lost(&self, id: SubscriptionId) -> bool;
}

/// Build the monitor selected by `options.kind`.
pub fn create_monitor(options: &ConnectionMonitorOptions) -> Box<dyn ConnectionMonitor> {
    match options.kind {
        MonitorKind::None => Box::new(NoopMonitor::new()),
        MonitorKind::Default => Box::new(HeartbeatMonitor::new(
            options.ping_interval(),
            options.max_ping_delay(),
        )),
    }
}

/// Monitor that never checks anything.
#[derive(Debug, Default)]
pub struct NoopMonitor {
    lost: Subscribers<LostHandler>,
}

impl NoopMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionMonitor for NoopMonitor {
    fn start(&self, _channel: Arc<dyn Channel>) {}

    fn stop(&self) {}

    fn on_connection_lost(&self, handler: Arc<LostHandler>) -> SubscriptionId {
        self.lost.add(handler)
    }

    fn remove_connection_lost(&self, id: SubscriptionId) -> bool {
        self.lost.remove(id)
    }
}

/// What a started heartbeat monitor holds on to.
struct Running {
    channel: Arc<dyn Channel>,
    interceptor: SubscriptionId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Symmetric heartbeat monitor.
pub struct HeartbeatMonitor {
    ping_interval: Duration,
    max_ping_delay: Duration,
    lost: Arc<Subscribers<LostHandler>>,
    running: Mutex<Option<Running>>,
}

impl HeartbeatMonitor {
    pub fn new(ping_interval: Duration, max_ping_delay: Duration) -> Self {
        Self {
            ping_interval,
            max_ping_delay,
            lost: Arc::new(Subscribers::new()),
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }
}

impl ConnectionMonitor for HeartbeatMonitor {
    /// Must be called from within a tokio runtime.
    fn start(&self, channel: Arc<dyn Channel>) {
        self.stop();

        let last_heard = Arc::new(Mutex::new(Instant::now()));
        let interceptor = {
            let last_heard = Arc::clone(&last_heard);
            channel.events().intercept(move |payload| {
                if !is_heartbeat(payload) {
                    return false;
                }
                *last_heard.lock() = Instant::now();
                true
            })
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat_loop(
            Arc::clone(&channel),
            last_heard,
            Arc::clone(&self.lost),
            self.ping_interval,
            self.max_ping_delay,
            cancel.clone(),
        ));

        *self.running.lock() = Some(Running {
            channel,
            interceptor,
            cancel,
            task,
        });
    }

    fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.channel.events().unsubscribe(running.interceptor);
            running.cancel.cancel();
        }
    }

    fn on_connection_lost(&self, handler: Arc<LostHandler>) -> SubscriptionId {
        self.lost.add(handler)
    }

    fn remove_connection_lost(&self, id: SubscriptionId) -> bool {
        self.lost.remove(id)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send a heartbeat every tick; give up once the peer is silent too long.
async fn heartbeat_loop(
    channel: Arc<dyn Channel>,
    last_heard: Arc<Mutex<Instant>>,
    lost: Arc<Subscribers<LostHandler>>,
    ping_interval: Duration,
    max_ping_delay: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("heartbeat monitor stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        // A failed heartbeat is not fatal on its own; the deadline decides.
        let status = channel.transmit(HEARTBEAT_FRAME, &cancel).await;
        if !status.is_ok() {
            tracing::debug!(?status, "heartbeat not sent");
        }

        let silent_for = last_heard.lock().elapsed();
        if silent_for > max_ping_delay {
            tracing::warn!(
                silent_ms = silent_for.as_millis() as u64,
                max_ping_delay_ms = max_ping_delay.as_millis() as u64,
                "heartbeat timeout, connection lost"
            );
            for (_, handler) in lost.snapshot().iter() {
                handler();
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::events::{BoxFuture, ReceiveEvents};
    use crate::status::SendStatus;

    /// In-memory channel; optionally loops sends back as received payloads.
    struct FakeChannel {
        events: ReceiveEvents,
        echo: bool,
        status: SendStatus,
        sent: AtomicUsize,
    }

    impl FakeChannel {
        fn new(echo: bool) -> Arc<Self> {
            Arc::new(Self {
                events: ReceiveEvents::new(),
                echo,
                status: SendStatus::Ok,
                sent: AtomicUsize::new(0),
            })
        }

        fn closed() -> Arc<Self> {
            Arc::new(Self {
                events: ReceiveEvents::new(),
                echo: false,
                status: SendStatus::Closed,
                sent: AtomicUsize::new(0),
            })
        }
    }

    impl Channel for FakeChannel {
        fn events(&self) -> &ReceiveEvents {
            &self.events
        }

        fn transmit<'a>(
            &'a self,
            payload: &'a [u8],
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, SendStatus> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.echo {
                self.events.dispatch(payload);
            }
            let status = self.status;
            Box::pin(async move { status })
        }
    }

    fn counting(monitor: &dyn ConnectionMonitor) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        monitor.on_connection_lost(Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    fn heartbeat_monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_fires_lost_once() {
        let monitor = heartbeat_monitor();
        let lost = counting(&monitor);
        let channel = FakeChannel::new(false);

        monitor.start(channel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(lost.load(Ordering::SeqCst), 1);

        // Checking stopped: no second report however long we wait.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_connection_alive() {
        let monitor = heartbeat_monitor();
        let lost = counting(&monitor);
        let channel = FakeChannel::new(true);

        monitor.start(channel.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(lost.load(Ordering::SeqCst), 0);
        assert!(channel.sent.load(Ordering::SeqCst) >= 19);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_heartbeats_reset_clock() {
        let monitor = heartbeat_monitor();
        let lost = counting(&monitor);
        let channel = FakeChannel::new(false);
        monitor.start(channel.clone());

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            channel.events().dispatch(HEARTBEAT_FRAME);
        }

        assert_eq!(lost.load(Ordering::SeqCst), 0);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_are_hidden_from_subscribers() {
        let monitor = heartbeat_monitor();
        let channel = FakeChannel::new(false);
        let (_id, mut inbox) = channel.events().subscribe_stream();
        monitor.start(channel.clone());

        channel.events().dispatch(HEARTBEAT_FRAME);
        channel.events().dispatch(b"app");
        monitor.stop();
        // After stop the heartbeat byte is an ordinary payload again.
        channel.events().dispatch(HEARTBEAT_FRAME);

        assert_eq!(&inbox.recv().await.unwrap()[..], b"app");
        assert_eq!(&inbox.recv().await.unwrap()[..], HEARTBEAT_FRAME);
        assert_eq!(channel.events().interceptor_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_lost() {
        let monitor = heartbeat_monitor();
        let lost = counting(&monitor);
        let channel = FakeChannel::new(false);

        monitor.start(channel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lost.load(Ordering::SeqCst), 1);

        monitor.start(channel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lost.load(Ordering::SeqCst), 2);
        assert_eq!(channel.events().interceptor_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_reported_lost_once() {
        let monitor = heartbeat_monitor();
        let lost = counting(&monitor);
        let channel = FakeChannel::closed();

        monitor.start(channel.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(lost.load(Ordering::SeqCst), 1);
        // Heartbeats stop with the deadline instead of running forever.
        let attempts = channel.sent.load(Ordering::SeqCst);
        assert!((5..=7).contains(&attempts), "attempts = {attempts}");
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_noop_monitor_never_fires() {
        let monitor = create_monitor(&ConnectionMonitorOptions::default());
        let lost = counting(monitor.as_ref());
        let channel = FakeChannel::new(false);

        monitor.start(channel.clone());
        monitor.stop();

        assert_eq!(lost.load(Ordering::SeqCst), 0);
        assert_eq!(channel.events().interceptor_count(), 0);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
    }
}
