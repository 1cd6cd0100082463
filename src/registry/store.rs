//! Interest registry implementation
//!
//! Records which consumers want which topics. The registry is the desired
//! state; it knows nothing about the connection and is mutated freely while
//! disconnected.

use std::collections::HashMap;

use crate::protocol::{EntityId, Topic};

use super::entry::{Bucket, Callback, Interest, TopicInterests, TopicStats};

/// Registry of consumer interests, keyed by topic
///
/// Not synchronized; the owner wraps it in a lock together with the
/// upstream tracker so topic transitions and upstream changes stay atomic.
#[derive(Debug, Default)]
pub struct InterestRegistry {
    /// Map of topic to its interests
    topics: HashMap<Topic, TopicInterests>,

    /// Registration counter, used to order snapshots
    next_seq: u64,
}

impl InterestRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    ///
    /// Registering the same `(topic, subscriber_id, entity_id)` again replaces
    /// the callback; the old one never fires again. Returns `true` if the
    /// topic had no interests before this call.
    pub fn add(
        &mut self,
        topic: &Topic,
        subscriber_id: &str,
        entity_id: Option<&EntityId>,
        callback: Callback,
    ) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        let interest = Interest::new(subscriber_id, callback, seq);
        let became_wanted = !self.is_wanted(topic);
        let entry = self.topics.entry(topic.clone()).or_default();

        match entity_id {
            Some(id) => entry.entities.entry(id.clone()).or_default().insert(interest),
            None => entry.wildcard.insert(interest),
        }

        tracing::debug!(
            topic = %topic,
            subscriber = subscriber_id,
            entity = ?entity_id.map(EntityId::as_str),
            "Interest added"
        );

        became_wanted
    }

    /// Remove one registration
    ///
    /// Unknown keys are ignored. Empty entity buckets and empty topics are
    /// dropped. Returns `true` if the topic has no interests left because of
    /// this call.
    pub fn remove(
        &mut self,
        topic: &Topic,
        subscriber_id: &str,
        entity_id: Option<&EntityId>,
    ) -> bool {
        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };

        let removed = match entity_id {
            Some(id) => match entry.entities.get_mut(id) {
                Some(bucket) => {
                    let removed = bucket.remove(subscriber_id);
                    if bucket.is_empty() {
                        entry.entities.remove(id);
                    }
                    removed
                }
                None => false,
            },
            None => entry.wildcard.remove(subscriber_id),
        };

        if !removed {
            return false;
        }

        tracing::debug!(
            topic = %topic,
            subscriber = subscriber_id,
            entity = ?entity_id.map(EntityId::as_str),
            "Interest removed"
        );

        if entry.is_empty() {
            self.topics.remove(topic);
            return true;
        }
        false
    }

    /// Snapshot of the interests matching a topic and optional entity
    ///
    /// Wildcard interests always match. With an entity id, the interests
    /// scoped to that entity are returned as well.
    pub fn interests_for(&self, topic: &Topic, entity_id: Option<&EntityId>) -> Vec<Interest> {
        let mut out = Vec::new();

        if let Some(entry) = self.topics.get(topic) {
            entry.wildcard.snapshot_into(&mut out);
            if let Some(bucket) = entity_id.and_then(|id| entry.entities.get(id)) {
                bucket.snapshot_into(&mut out);
            }
        }

        out
    }

    /// Whether any interest is registered for the topic
    pub fn is_wanted(&self, topic: &Topic) -> bool {
        self.topics.contains_key(topic)
    }

    /// Topics with at least one interest
    pub fn wanted_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }

    /// Number of topics with at least one interest
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of registered interests across all topics
    pub fn interest_count(&self) -> usize {
        self.topics.values().map(TopicInterests::len).sum()
    }

    /// Statistics for one topic
    pub fn topic_stats(&self, topic: &Topic) -> Option<TopicStats> {
        self.topics.get(topic).map(|entry| TopicStats {
            wildcard: entry.wildcard.len(),
            scoped: entry.entities.values().map(Bucket::len).sum(),
            entities: entry.entities.len(),
        })
    }

    /// Remove every interest
    ///
    /// Returns the topics that were wanted.
    pub fn clear(&mut self) -> Vec<Topic> {
        let topics: Vec<Topic> = self.topics.keys().cloned().collect();
        for entry in self.topics.values() {
            entry.wildcard.deactivate_all();
            for bucket in entry.entities.values() {
                bucket.deactivate_all();
            }
        }
        self.topics.clear();
        topics
    }
}
