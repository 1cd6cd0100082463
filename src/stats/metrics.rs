//! Counters for multiplexer activity

use std::sync::atomic::{AtomicU64, Ordering};

use crate::connection::ConnectionState;

/// Live counters, updated from the connection task and dispatch path
#[derive(Debug, Default)]
pub struct MuxMetrics {
    frames_received: AtomicU64,
    callbacks_invoked: AtomicU64,
    frames_dropped: AtomicU64,
    callback_panics: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
}

impl MuxMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame that was routed
    pub fn record_dispatch(&self, delivered: usize, failed: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.callbacks_invoked
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.callback_panics.fetch_add(failed as u64, Ordering::Relaxed);
    }

    /// Record a frame dropped as malformed
    pub fn record_dropped(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed handshake
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a link
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot, combined with registry and tracker sizes
    pub fn snapshot(
        &self,
        state: ConnectionState,
        topics: usize,
        interests: usize,
        upstream_subscriptions: usize,
    ) -> MuxStats {
        MuxStats {
            state,
            topics,
            interests,
            upstream_subscriptions,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a multiplexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxStats {
    /// Connection state
    pub state: ConnectionState,
    /// Topics with at least one interest
    pub topics: usize,
    /// Registered interests
    pub interests: usize,
    /// Live upstream subscriptions
    pub upstream_subscriptions: usize,
    /// Frames received from the bus, including malformed ones
    pub frames_received: u64,
    /// Callback invocations that completed
    pub callbacks_invoked: u64,
    /// Frames dropped as malformed
    pub frames_dropped: u64,
    /// Callback invocations that panicked
    pub callback_panics: u64,
    /// Completed handshakes
    pub connects: u64,
    /// Links that ended
    pub disconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MuxMetrics::new();
        metrics.record_dispatch(3, 1);
        metrics.record_dispatch(0, 0);
        metrics.record_dropped();
        metrics.record_connect();

        let stats = metrics.snapshot(ConnectionState::Connected, 2, 5, 2);
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.callbacks_invoked, 3);
        assert_eq!(stats.callback_panics, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.disconnects, 0);
        assert_eq!(stats.upstream_subscriptions, 2);
    }
}
