//! Interest and bucket types
//!
//! This module defines the per-topic state stored in the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::protocol::{EntityId, Envelope};

/// Consumer callback invoked with every matching envelope
pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// A single registered callback
///
/// Cheap to clone; clones share the activity flag, so a snapshot taken
/// before removal stops firing once the interest is removed.
#[derive(Clone)]
pub struct Interest {
    subscriber_id: Arc<str>,
    callback: Callback,
    active: Arc<AtomicBool>,
    seq: u64,
}

impl Interest {
    pub(super) fn new(subscriber_id: &str, callback: Callback, seq: u64) -> Self {
        Self {
            subscriber_id: Arc::from(subscriber_id),
            callback,
            active: Arc::new(AtomicBool::new(true)),
            seq,
        }
    }

    /// Subscriber that registered this interest
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Whether the interest is still registered
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Invoke the callback if the interest is still registered
    ///
    /// Returns `false` without calling anything if it was removed. The check
    /// and the call are not one atomic step: a removal on another thread
    /// after the check lets this call run to completion.
    pub fn invoke(&self, envelope: &Envelope) -> bool {
        if !self.is_active() {
            return false;
        }
        (self.callback)(envelope);
        true
    }

    pub(super) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interest")
            .field("subscriber_id", &self.subscriber_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Interests keyed by subscriber
#[derive(Debug, Default)]
pub(super) struct Bucket {
    interests: HashMap<Arc<str>, Interest>,
}

impl Bucket {
    /// Insert, replacing (and deactivating) any interest with the same subscriber
    pub(super) fn insert(&mut self, interest: Interest) {
        let key = Arc::clone(&interest.subscriber_id);
        if let Some(old) = self.interests.insert(key, interest) {
            old.deactivate();
        }
    }

    pub(super) fn remove(&mut self, subscriber_id: &str) -> bool {
        match self.interests.remove(subscriber_id) {
            Some(old) => {
                old.deactivate();
                true
            }
            None => false,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.interests.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }

    /// Append the bucket's interests in registration order
    pub(super) fn snapshot_into(&self, out: &mut Vec<Interest>) {
        let start = out.len();
        out.extend(self.interests.values().cloned());
        out[start..].sort_by_key(|interest| interest.seq);
    }

    pub(super) fn deactivate_all(&self) {
        for interest in self.interests.values() {
            interest.deactivate();
        }
    }
}

/// All interests registered against one topic
///
/// Kept as two explicit maps: wildcard interests, and entity-scoped
/// interests grouped by entity id.
#[derive(Debug, Default)]
pub(super) struct TopicInterests {
    pub(super) wildcard: Bucket,
    pub(super) entities: HashMap<EntityId, Bucket>,
}

impl TopicInterests {
    pub(super) fn is_empty(&self) -> bool {
        self.wildcard.is_empty() && self.entities.is_empty()
    }

    pub(super) fn len(&self) -> usize {
        self.wildcard.len() + self.entities.values().map(Bucket::len).sum::<usize>()
    }
}

/// Per-topic statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStats {
    /// Wildcard interests
    pub wildcard: usize,
    /// Entity-scoped interests
    pub scoped: usize,
    /// Distinct entity ids with at least one interest
    pub entities: usize,
}
