//! Multiplexer implementation
//!
//! One instance owns one bus connection, one interest registry and one
//! upstream tracker. Registry and tracker share a lock so that a topic's
//! empty/non-empty transition and the matching upstream change happen
//! together; callbacks always run outside it.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::bus::{FrameHandler, MessageBus};
use crate::connection::{ConnectionConfig, ConnectionHooks, ConnectionManager, ConnectionState};
use crate::error::{ConfigError, Error, Result};
use crate::protocol::{EntityId, Envelope, Method, Topic};
use crate::registry::{Callback, InterestRegistry, TopicStats};
use crate::router;
use crate::stats::{MuxMetrics, MuxStats};
use crate::tracker::UpstreamTracker;

/// Desired state (registry) and actual upstream state (tracker)
#[derive(Default)]
struct Core {
    registry: InterestRegistry,
    tracker: UpstreamTracker,
}

/// State shared with the connection task and bus frame handlers
struct Shared {
    me: Weak<Shared>,
    core: Mutex<Core>,
    connection: Arc<ConnectionManager>,
    metrics: MuxMetrics,
}

impl Shared {
    fn bus(&self) -> &dyn MessageBus {
        self.connection.bus().as_ref()
    }

    /// Handler given to the bus for one upstream subscription
    ///
    /// Holds a weak reference so a dropped multiplexer is not kept alive by
    /// the bus.
    fn frame_handler(&self, topic: &Topic) -> FrameHandler {
        let shared = self.me.clone();
        let topic = topic.clone();
        Arc::new(move |frame: Bytes| {
            if let Some(shared) = shared.upgrade() {
                shared.on_frame(&topic, &frame);
            }
        })
    }

    fn on_frame(&self, upstream: &Topic, frame: &[u8]) {
        let result = router::dispatch(frame, |topic, entity| {
            self.core.lock().registry.interests_for(topic, entity)
        });

        match result {
            Ok((_, outcome)) => {
                self.metrics
                    .record_dispatch(outcome.delivered, outcome.failed);
            }
            Err(e) => {
                self.metrics.record_dropped();
                tracing::debug!(topic = %upstream, error = %e, "Dropping malformed frame");
            }
        }
    }

    /// Subscribe upstream if connected and not yet subscribed
    fn ensure_upstream(&self, core: &mut Core, topic: &Topic) {
        if self.connection.is_connected() && !core.tracker.is_subscribed(topic) {
            core.tracker
                .ensure(topic, self.bus(), self.frame_handler(topic));
        }
    }
}

impl ConnectionHooks for Shared {
    fn on_connected(&self) {
        self.metrics.record_connect();

        let mut core = self.core.lock();
        let Core { registry, tracker } = &mut *core;
        tracker.reconcile(registry.wanted_topics(), self.bus(), |topic| {
            self.frame_handler(topic)
        });
    }

    fn on_tick(&self) {
        let mut core = self.core.lock();
        let Core { registry, tracker } = &mut *core;
        let created = tracker.reconcile(registry.wanted_topics(), self.bus(), |topic| {
            self.frame_handler(topic)
        });
        if created > 0 {
            tracing::debug!(created = created, "Pending upstream subscriptions retried");
        }
    }

    fn on_disconnected(&self) {
        self.metrics.record_disconnect();

        let forgotten = self.core.lock().tracker.invalidate();
        tracing::debug!(
            forgotten = forgotten,
            "Upstream subscriptions invalidated by disconnect"
        );
    }
}

/// Real-time update multiplexer
///
/// Fans any number of consumer interests out to at most one upstream
/// subscription per topic, and fans inbound frames back in to the matching
/// callbacks.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use realtime_mux::bus::MemoryBus;
/// use realtime_mux::{EntityId, Method, Multiplexer};
///
/// # async fn example() -> Result<(), realtime_mux::ConfigError> {
/// let mux = Multiplexer::new(Arc::new(MemoryBus::new()));
/// mux.start();
///
/// mux.subscribe("Token", Method::Update, |env| {
///     println!("token changed: {:?}", env.content);
/// }, "token-table", None)?;
///
/// mux.subscribe("Token", Method::Update, |env| {
///     println!("T1 changed: {:?}", env.content);
/// }, "token-detail", Some(EntityId::from("T1")))?;
///
/// mux.unsubscribe("Token", Method::Update, "token-detail", Some(EntityId::from("T1")))?;
/// # Ok(())
/// # }
/// ```
pub struct Multiplexer {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    /// Create a multiplexer with default connection settings
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_config(bus, ConnectionConfig::default())
    }

    /// Create a multiplexer with custom connection settings
    pub fn with_config(bus: Arc<dyn MessageBus>, config: ConnectionConfig) -> Self {
        let connection = Arc::new(ConnectionManager::new(bus, config));
        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            core: Mutex::new(Core::default()),
            connection,
            metrics: MuxMetrics::new(),
        });

        Self {
            shared,
            task: Mutex::new(None),
        }
    }

    /// Start connecting in the background
    ///
    /// Must be called from within a tokio runtime. Calling it while the
    /// connection task is running does nothing; calling it after a terminal
    /// error or [`shutdown`](Self::shutdown) starts over.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let hooks: Arc<dyn ConnectionHooks> = self.shared.clone();
        *task = Some(self.shared.connection.spawn(hooks));
    }

    /// Stop the connection task, release upstream subscriptions and close
    /// the bus link
    ///
    /// Registered interests are kept; a later [`start`](Self::start)
    /// resubscribes them.
    pub fn shutdown(&self) {
        self.teardown();
        self.shared.connection.mark_stopped();
        tracing::info!("Multiplexer shut down");
    }

    /// Abort the task, then unsubscribe every live upstream subscription and
    /// disconnect. Does nothing if the task was never started.
    fn teardown(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        task.abort();

        let was_connected = self.is_connected();
        let mut core = self.shared.core.lock();
        let topics: Vec<Topic> = core.registry.wanted_topics().cloned().collect();
        for topic in &topics {
            core.tracker.release(topic, self.shared.bus());
        }
        core.tracker.invalidate();
        drop(core);

        self.shared.bus().disconnect();
        if was_connected {
            self.shared.metrics.record_disconnect();
        }
    }

    /// Register interest in a topic
    ///
    /// `subscriber_id` distinguishes independent consumers of the same topic.
    /// With `entity_id`, the callback fires only for `update`/`delete` frames
    /// about that entity; without it, for every frame on the topic.
    /// Subscribing again with the same key replaces the callback.
    ///
    /// The upstream subscription is requested in the background; the first
    /// delivered frame is the only confirmation.
    pub fn subscribe<F>(
        &self,
        table: &str,
        method: Method,
        callback: F,
        subscriber_id: &str,
        entity_id: Option<EntityId>,
    ) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let topic = Topic::new(table, method)?;

        if entity_id.is_some() && !method.is_entity_scoped() {
            tracing::warn!(
                topic = %topic,
                subscriber = subscriber_id,
                "Entity-scoped interest on insert will never match"
            );
        }

        let callback: Callback = Arc::new(callback);
        let mut core = self.shared.core.lock();
        core.registry
            .add(&topic, subscriber_id, entity_id.as_ref(), callback);
        self.shared.ensure_upstream(&mut core, &topic);

        Ok(())
    }

    /// Remove one registration
    ///
    /// Unknown keys are ignored. Removing the last interest on a topic
    /// releases its upstream subscription. Safe to call from inside a
    /// callback.
    ///
    /// Once this returns, dispatches that start later never invoke the
    /// removed callback, and neither does the dispatch running on the
    /// calling thread. A dispatch on another thread that had already passed
    /// the activity check may still complete one call concurrently; callers
    /// that free resources used by the callback must tolerate that.
    pub fn unsubscribe(
        &self,
        table: &str,
        method: Method,
        subscriber_id: &str,
        entity_id: Option<EntityId>,
    ) -> std::result::Result<(), ConfigError> {
        let topic = Topic::new(table, method)?;

        let mut core = self.shared.core.lock();
        if core
            .registry
            .remove(&topic, subscriber_id, entity_id.as_ref())
        {
            core.tracker.release(&topic, self.shared.bus());
        }

        Ok(())
    }

    /// Publish a frame on `"<table>/<method>"`
    pub fn send(&self, table: &str, method: Method, body: Bytes) -> Result<()> {
        let topic = Topic::new(table, method)?;

        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Error => return Err(Error::Errored),
            _ => return Err(Error::NotConnected),
        }

        self.shared.bus().send(&topic.path(), body)?;
        Ok(())
    }

    /// Whether the connection gave up after a protocol error
    ///
    /// While errored, `subscribe` still records interests but nothing is
    /// delivered.
    pub fn is_errored(&self) -> bool {
        self.shared.connection.is_errored()
    }

    /// Whether the bus link is up
    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_connected()
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Watch connection state transitions
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.shared.connection.watch_state()
    }

    /// Whether any interest is registered on the topic
    pub fn is_wanted(&self, table: &str, method: Method) -> bool {
        Topic::new(table, method)
            .map(|topic| self.shared.core.lock().registry.is_wanted(&topic))
            .unwrap_or(false)
    }

    /// Interest counts for one topic
    pub fn topic_stats(&self, table: &str, method: Method) -> Option<TopicStats> {
        let topic = Topic::new(table, method).ok()?;
        self.shared.core.lock().registry.topic_stats(&topic)
    }

    /// Snapshot of counters and sizes
    pub fn stats(&self) -> MuxStats {
        let core = self.shared.core.lock();
        self.shared.metrics.snapshot(
            self.state(),
            core.registry.topic_count(),
            core.registry.interest_count(),
            core.tracker.len(),
        )
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.teardown();
    }
}
