//! Connection manager
//!
//! Owns the single logical link to the bus. A background task connects,
//! reports each completed handshake, waits for the link to end and
//! reconnects after the configured delay.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bus::{BusLink, CloseReason, ConnectError, MessageBus};

use super::config::{ConnectionConfig, ErrorPolicy};
use super::state::{ConnectionState, StateCell};

/// Receives connection lifecycle events
pub trait ConnectionHooks: Send + Sync + 'static {
    /// Called exactly once per completed handshake, after the state is `Connected`
    fn on_connected(&self);

    /// Called when an established link ends, after the state has left `Connected`
    fn on_disconnected(&self);

    /// Called every `resubscribe_interval` while the link is up
    fn on_tick(&self) {}
}

/// How one link attempt ended
enum Outcome {
    /// Recoverable; try again after the delay
    Retry,
    /// Protocol error under the terminal policy
    Fatal,
}

/// Manages connect / reconnect for one bus
pub struct ConnectionManager {
    bus: Arc<dyn MessageBus>,
    config: ConnectionConfig,
    state: StateCell,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state
    pub fn new(bus: Arc<dyn MessageBus>, config: ConnectionConfig) -> Self {
        Self {
            bus,
            config,
            state: StateCell::new(),
        }
    }

    /// The bus this manager connects
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    /// Whether the manager gave up after a protocol error
    pub fn is_errored(&self) -> bool {
        self.state.get() == ConnectionState::Error
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Spawn the connection task
    ///
    /// Returns immediately; the handle can be used to abort the task.
    pub fn spawn(self: &Arc<Self>, hooks: Arc<dyn ConnectionHooks>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run(hooks.as_ref()).await;
        })
    }

    /// Connect and keep reconnecting until a terminal protocol error
    pub async fn run(&self, hooks: &dyn ConnectionHooks) {
        if self.is_errored() {
            self.state.reset();
        }

        let mut attempt: u32 = 0;

        loop {
            match self.connect_once(hooks).await {
                (Outcome::Fatal, _) => return,
                (Outcome::Retry, connected) => {
                    if connected {
                        attempt = 0;
                    }
                }
            }

            let delay = self.config.backoff(attempt);
            attempt = attempt.saturating_add(1);

            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempt,
                "Reconnecting after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Move to `Disconnected` (used when the task is stopped from outside)
    ///
    /// Leaves a sticky `Error` state untouched.
    pub fn mark_stopped(&self) {
        self.state.set(ConnectionState::Disconnected);
    }

    /// One connect attempt plus, on success, the lifetime of the link
    ///
    /// Returns the outcome and whether a handshake completed.
    async fn connect_once(&self, hooks: &dyn ConnectionHooks) -> (Outcome, bool) {
        self.state.set(ConnectionState::Connecting);

        let options = self.config.connect_options();
        let result =
            match tokio::time::timeout(self.config.connect_timeout, self.bus.connect(&options))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Transport(format!(
                    "handshake timed out after {:?}",
                    self.config.connect_timeout
                ))),
            };

        let link = match result {
            Ok(link) => link,
            Err(ConnectError::Transport(msg)) => {
                tracing::warn!(error = %msg, "Connect failed");
                self.state.set(ConnectionState::Disconnected);
                return (Outcome::Retry, false);
            }
            Err(ConnectError::Protocol(msg)) => {
                return (self.on_protocol_error(&msg), false);
            }
        };

        self.state.set(ConnectionState::Connected);
        tracing::info!("Connected to message bus");
        hooks.on_connected();

        let reason = self.wait_closed(link, hooks).await;

        self.state.set(ConnectionState::Disconnected);
        hooks.on_disconnected();

        let outcome = match reason {
            CloseReason::Dropped => {
                tracing::warn!("Connection to message bus lost");
                Outcome::Retry
            }
            CloseReason::ProtocolError(msg) => self.on_protocol_error(&msg),
        };

        (outcome, true)
    }

    /// Wait for the link to end, ticking the hooks meanwhile
    async fn wait_closed(&self, link: BusLink, hooks: &dyn ConnectionHooks) -> CloseReason {
        let closed = link.closed();
        tokio::pin!(closed);

        let period = self.config.resubscribe_interval.max(Duration::from_millis(1));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                reason = &mut closed => return reason,
                _ = tick.tick() => hooks.on_tick(),
            }
        }
    }

    fn on_protocol_error(&self, msg: &str) -> Outcome {
        match self.config.error_policy {
            ErrorPolicy::Terminal => {
                self.state.set(ConnectionState::Error);
                tracing::error!(
                    error = %msg,
                    "Bus protocol error, real-time updates disabled"
                );
                Outcome::Fatal
            }
            ErrorPolicy::Retry => {
                self.state.set(ConnectionState::Disconnected);
                tracing::warn!(error = %msg, "Bus protocol error, will reconnect");
                Outcome::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::bus::{BusError, ConnectOptions, FrameHandler, MemoryBus, SubscriptionHandle};

    /// Bus whose handshake never completes
    #[derive(Default)]
    struct StalledBus {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MessageBus for StalledBus {
        async fn connect(&self, _options: &ConnectOptions) -> Result<BusLink, ConnectError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        fn subscribe_topic(
            &self,
            _path: &str,
            _on_message: FrameHandler,
        ) -> Result<SubscriptionHandle, BusError> {
            Err(BusError::NotConnected)
        }

        fn unsubscribe_topic(&self, _handle: SubscriptionHandle) {}

        fn send(&self, _path: &str, _body: Bytes) -> Result<(), BusError> {
            Err(BusError::NotConnected)
        }

        fn disconnect(&self) {}
    }

    /// Memory bus that records when each connect attempt happened
    #[derive(Default)]
    struct TimedBus {
        inner: MemoryBus,
        attempts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl MessageBus for TimedBus {
        async fn connect(&self, options: &ConnectOptions) -> Result<BusLink, ConnectError> {
            self.attempts.lock().push(Instant::now());
            self.inner.connect(options).await
        }

        fn subscribe_topic(
            &self,
            path: &str,
            on_message: FrameHandler,
        ) -> Result<SubscriptionHandle, BusError> {
            self.inner.subscribe_topic(path, on_message)
        }

        fn unsubscribe_topic(&self, handle: SubscriptionHandle) {
            self.inner.unsubscribe_topic(handle)
        }

        fn send(&self, path: &str, body: Bytes) -> Result<(), BusError> {
            self.inner.send(path, body)
        }

        fn disconnect(&self) {
            self.inner.disconnect()
        }
    }

    #[derive(Default)]
    struct CountingHooks {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl ConnectionHooks for CountingHooks {
        fn on_connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnected(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig::default().reconnect_delay(Duration::from_millis(10))
    }

    /// Paused-clock timers fire on millisecond ticks
    fn assert_near(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= Duration::from_millis(2),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    async fn wait_for(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_and_reconnect() {
        let bus = Arc::new(MemoryBus::new());
        let manager = Arc::new(ConnectionManager::new(bus.clone(), fast_config()));
        let hooks = Arc::new(CountingHooks::default());

        let task = manager.spawn(hooks.clone());
        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(hooks.connected.load(Ordering::SeqCst), 1);

        bus.drop_link();
        wait_for(&manager, ConnectionState::Disconnected).await;
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(hooks.connected.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(bus.connect_count(), 2);

        task.abort();
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let bus = Arc::new(MemoryBus::new());
        bus.fail_next_connect(ConnectError::Transport("refused".into()));
        bus.fail_next_connect(ConnectError::Transport("refused".into()));

        let manager = Arc::new(ConnectionManager::new(bus.clone(), fast_config()));
        let hooks = Arc::new(CountingHooks::default());
        let task = manager.spawn(hooks.clone());

        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(hooks.connected.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.disconnected.load(Ordering::SeqCst), 0);

        task.abort();
    }

    #[tokio::test]
    async fn test_handshake_error_is_terminal() {
        let bus = Arc::new(MemoryBus::new());
        bus.fail_next_connect(ConnectError::Protocol("ERROR frame".into()));

        let manager = Arc::new(ConnectionManager::new(bus.clone(), fast_config()));
        let hooks = Arc::new(CountingHooks::default());

        // run() returns once the terminal state is reached
        tokio::time::timeout(Duration::from_secs(5), manager.run(hooks.as_ref()))
            .await
            .unwrap();

        assert!(manager.is_errored());
        assert_eq!(bus.connect_count(), 0);
        assert_eq!(hooks.connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_protocol_error_after_connect_is_terminal() {
        let bus = Arc::new(MemoryBus::new());
        let manager = Arc::new(ConnectionManager::new(bus.clone(), fast_config()));
        let hooks = Arc::new(CountingHooks::default());
        let task = manager.spawn(hooks.clone());

        wait_for(&manager, ConnectionState::Connected).await;
        bus.protocol_error("broker shutting down");
        wait_for(&manager, ConnectionState::Error).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.connect_count(), 1);
        assert_eq!(hooks.disconnected.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_retry_policy_reconnects_after_protocol_error() {
        let bus = Arc::new(MemoryBus::new());
        bus.fail_next_connect(ConnectError::Protocol("ERROR frame".into()));

        let config = fast_config().error_policy(ErrorPolicy::Retry);
        let manager = Arc::new(ConnectionManager::new(bus.clone(), config));
        let hooks = Arc::new(CountingHooks::default());
        let task = manager.spawn(hooks.clone());

        wait_for(&manager, ConnectionState::Connected).await;
        assert!(!manager.is_errored());
        assert_eq!(bus.connect_count(), 1);

        task.abort();
    }

    #[tokio::test]
    async fn test_heartbeats_passed_to_bus() {
        let bus = Arc::new(MemoryBus::new());
        let config =
            fast_config().heartbeat(Duration::from_secs(3), Duration::from_secs(7));
        let manager = Arc::new(ConnectionManager::new(bus.clone(), config));
        let task = manager.spawn(Arc::new(CountingHooks::default()));

        wait_for(&manager, ConnectionState::Connected).await;
        let options = bus.last_connect_options().unwrap();
        assert_eq!(options.heartbeat_outgoing, Duration::from_secs(3));
        assert_eq!(options.heartbeat_incoming, Duration::from_secs(7));

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_is_retried() {
        let bus = Arc::new(StalledBus::default());
        let config = ConnectionConfig::default()
            .connect_timeout(Duration::from_millis(50))
            .reconnect_delay(Duration::from_millis(100));
        let manager = Arc::new(ConnectionManager::new(bus.clone(), config));
        let hooks = Arc::new(CountingHooks::default());

        let started = Instant::now();
        let task = manager.spawn(hooks.clone());

        wait_for(&manager, ConnectionState::Connecting).await;
        wait_for(&manager, ConnectionState::Disconnected).await;
        assert_near(started.elapsed(), Duration::from_millis(50));
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 1);

        // 100ms delay, then a second 50ms handshake that also times out
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(hooks.connected.load(Ordering::SeqCst), 0);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_resets_after_connect() {
        let bus = Arc::new(TimedBus::default());
        for _ in 0..3 {
            bus.inner
                .fail_next_connect(ConnectError::Transport("refused".into()));
        }

        let config = ConnectionConfig::default()
            .reconnect_delay(Duration::from_millis(100))
            .exponential_backoff(Duration::from_secs(1));
        let manager = Arc::new(ConnectionManager::new(bus.clone(), config));
        let task = manager.spawn(Arc::new(CountingHooks::default()));

        wait_for(&manager, ConnectionState::Connected).await;
        let attempts = bus.attempts.lock().clone();
        assert_eq!(attempts.len(), 4);
        assert_near(attempts[1] - attempts[0], Duration::from_millis(100));
        assert_near(attempts[2] - attempts[1], Duration::from_millis(200));
        assert_near(attempts[3] - attempts[2], Duration::from_millis(400));

        // after a successful handshake the delay starts over
        bus.inner
            .fail_next_connect(ConnectError::Transport("refused".into()));
        let dropped_at = Instant::now();
        bus.inner.drop_link();

        wait_for(&manager, ConnectionState::Disconnected).await;
        wait_for(&manager, ConnectionState::Connected).await;

        let attempts = bus.attempts.lock().clone();
        assert_eq!(attempts.len(), 6);
        assert_near(attempts[4] - dropped_at, Duration::from_millis(100));
        assert_near(attempts[5] - attempts[4], Duration::from_millis(200));

        task.abort();
    }
}
