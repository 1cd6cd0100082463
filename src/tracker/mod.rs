//! Upstream subscription tracker
//!
//! Holds at most one bus subscription per topic. The registry says which
//! topics are wanted; the tracker makes the bus agree, either one topic at a
//! time as interests come and go, or wholesale after a (re)connect.

use std::collections::HashMap;

use crate::bus::{FrameHandler, MessageBus, SubscriptionHandle};
use crate::protocol::Topic;

/// Map of topic to its live upstream subscription
#[derive(Debug, Default)]
pub struct UpstreamTracker {
    handles: HashMap<Topic, SubscriptionHandle>,
}

impl UpstreamTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe upstream unless a subscription is already recorded
    ///
    /// Returns `true` if a new upstream subscription was created. A rejected
    /// request is logged and leaves the topic pending for the next reconcile.
    pub fn ensure(&mut self, topic: &Topic, bus: &dyn MessageBus, handler: FrameHandler) -> bool {
        if self.handles.contains_key(topic) {
            return false;
        }

        match bus.subscribe_topic(&topic.path(), handler) {
            Ok(handle) => {
                tracing::debug!(topic = %topic, handle = %handle, "Upstream subscribed");
                self.handles.insert(topic.clone(), handle);
                true
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Upstream subscribe failed");
                false
            }
        }
    }

    /// Unsubscribe upstream and forget the handle
    ///
    /// Returns `false` if no subscription was recorded for the topic.
    pub fn release(&mut self, topic: &Topic, bus: &dyn MessageBus) -> bool {
        match self.handles.remove(topic) {
            Some(handle) => {
                bus.unsubscribe_topic(handle);
                tracing::debug!(topic = %topic, handle = %handle, "Upstream unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Bring upstream subscriptions in line with the wanted topics
    ///
    /// Subscribes every wanted topic that has no handle and releases handles
    /// of topics that are no longer wanted. Running it twice in a row makes
    /// no further bus calls. Returns the number of subscriptions created.
    pub fn reconcile<'a, I, F>(&mut self, wanted: I, bus: &dyn MessageBus, make_handler: F) -> usize
    where
        I: IntoIterator<Item = &'a Topic>,
        F: Fn(&Topic) -> FrameHandler,
    {
        let wanted: Vec<&Topic> = wanted.into_iter().collect();

        let stale: Vec<Topic> = self
            .handles
            .keys()
            .filter(|topic| !wanted.contains(topic))
            .cloned()
            .collect();
        for topic in &stale {
            self.release(topic, bus);
        }

        let mut created = 0;
        for topic in wanted {
            if self.handles.contains_key(topic) {
                continue;
            }
            if self.ensure(topic, bus, make_handler(topic)) {
                created += 1;
            }
        }

        if created > 0 || !stale.is_empty() {
            tracing::info!(
                created = created,
                released = stale.len(),
                live = self.handles.len(),
                "Upstream subscriptions reconciled"
            );
        }

        created
    }

    /// Forget every handle without calling the bus
    ///
    /// Used after the link drops, when the bus has already discarded them.
    /// Returns the number of handles forgotten.
    pub fn invalidate(&mut self) -> usize {
        let count = self.handles.len();
        self.handles.clear();
        count
    }

    /// Whether an upstream subscription is recorded for the topic
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.handles.contains_key(topic)
    }

    /// Handle recorded for the topic
    pub fn handle(&self, topic: &Topic) -> Option<SubscriptionHandle> {
        self.handles.get(topic).copied()
    }

    /// Number of live upstream subscriptions
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no upstream subscription is live
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
