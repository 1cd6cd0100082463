//! In-process message bus
//!
//! Delivers frames published through [`MemoryBus::publish`] to the handlers
//! subscribed on the same path. Used by tests and demos; it also lets a
//! caller script handshake failures and drop the current link, and counts
//! live subscriptions so the one-upstream-per-topic property is observable.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::protocol::Envelope;

use super::{
    BusError, BusLink, CloseReason, ConnectError, ConnectOptions, FrameHandler, LinkCloser,
    MessageBus, SubscriptionHandle,
};

struct Subscription {
    path: String,
    handler: FrameHandler,
}

#[derive(Default)]
struct MemoryState {
    link: Option<LinkCloser>,
    subscriptions: HashMap<u64, Subscription>,
    next_handle: u64,
    scripted: VecDeque<ConnectError>,
    rejected: VecDeque<String>,
    connects: u32,
    subscribe_calls: u32,
    last_options: Option<ConnectOptions>,
    sent: Vec<(String, Bytes)>,
}

/// In-process [`MessageBus`] implementation
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<MemoryState>,
}

impl MemoryBus {
    /// Create an idle bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connect attempt fail with `error`
    ///
    /// Failures queue up; each connect attempt consumes one.
    pub fn fail_next_connect(&self, error: ConnectError) {
        self.state.lock().scripted.push_back(error);
    }

    /// Make the next `subscribe_topic` call fail with [`BusError::Rejected`]
    ///
    /// Rejections queue up; each subscribe request on a live link consumes one.
    pub fn reject_next_subscribe(&self, message: impl Into<String>) {
        self.state.lock().rejected.push_back(message.into());
    }

    /// Deliver a raw frame to every subscription on `path`
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, path: &str, frame: Bytes) -> usize {
        let handlers: Vec<FrameHandler> = {
            let state = self.state.lock();
            let mut subs: Vec<(&u64, &Subscription)> = state
                .subscriptions
                .iter()
                .filter(|(_, sub)| sub.path == path)
                .collect();
            subs.sort_by_key(|(id, _)| **id);
            subs.into_iter().map(|(_, sub)| sub.handler.clone()).collect()
        };

        for handler in &handlers {
            handler(frame.clone());
        }
        handlers.len()
    }

    /// Encode an envelope and deliver it on its `"<table>/<method>"` path
    pub fn publish_envelope(&self, envelope: &Envelope) -> usize {
        let path = format!("{}/{}", envelope.table, envelope.method);
        self.publish(&path, envelope.encode())
    }

    /// Drop the current link as a transport failure would
    pub fn drop_link(&self) {
        self.close_link(CloseReason::Dropped);
    }

    /// End the current link with a protocol error
    pub fn protocol_error(&self, message: impl Into<String>) {
        self.close_link(CloseReason::ProtocolError(message.into()));
    }

    fn close_link(&self, reason: CloseReason) {
        let closer = {
            let mut state = self.state.lock();
            state.subscriptions.clear();
            state.link.take()
        };
        if let Some(closer) = closer {
            closer.close(reason);
        }
    }

    /// Whether a link is established
    pub fn is_connected(&self) -> bool {
        self.state.lock().link.is_some()
    }

    /// Number of live subscriptions on `path`
    pub fn live_subscriptions(&self, path: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.path == path)
            .count()
    }

    /// Number of live subscriptions across all paths
    pub fn total_live_subscriptions(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }

    /// Number of accepted `subscribe_topic` calls
    pub fn subscribe_calls(&self) -> u32 {
        self.state.lock().subscribe_calls
    }

    /// Options passed to the most recent connect attempt
    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.state.lock().last_options.clone()
    }

    /// Frames published through [`MessageBus::send`]
    pub fn sent(&self) -> Vec<(String, Bytes)> {
        self.state.lock().sent.clone()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn connect(&self, options: &ConnectOptions) -> Result<BusLink, ConnectError> {
        let mut state = self.state.lock();
        state.last_options = Some(options.clone());

        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }

        let (link, closer) = BusLink::new();
        state.subscriptions.clear();
        state.link = Some(closer);
        state.connects += 1;
        Ok(link)
    }

    fn subscribe_topic(
        &self,
        path: &str,
        on_message: FrameHandler,
    ) -> Result<SubscriptionHandle, BusError> {
        let mut state = self.state.lock();
        if state.link.is_none() {
            return Err(BusError::NotConnected);
        }
        if let Some(message) = state.rejected.pop_front() {
            return Err(BusError::Rejected(message));
        }

        state.next_handle += 1;
        let id = state.next_handle;
        state.subscriptions.insert(
            id,
            Subscription {
                path: path.to_string(),
                handler: on_message,
            },
        );
        state.subscribe_calls += 1;
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe_topic(&self, handle: SubscriptionHandle) {
        self.state.lock().subscriptions.remove(&handle.id());
    }

    fn send(&self, path: &str, body: Bytes) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if state.link.is_none() {
            return Err(BusError::NotConnected);
        }
        state.sent.push((path.to_string(), body));
        Ok(())
    }

    fn disconnect(&self) {
        self.close_link(CloseReason::Dropped);
    }
}
