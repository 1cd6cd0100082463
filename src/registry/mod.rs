//! Interest registry for fan-out routing
//!
//! The registry records every consumer callback against the topic it wants,
//! optionally scoped to one entity. It is the desired state that the upstream
//! tracker reconciles against.
//!
//! # Layout
//!
//! ```text
//!                      InterestRegistry
//!               ┌──────────────────────────────┐
//!               │ topics: HashMap<Topic,       │
//!               │   TopicInterests {           │
//!               │     wildcard: Bucket,        │
//!               │     entities: HashMap<       │
//!               │       EntityId, Bucket>,     │
//!               │   }                          │
//!               │ >                            │
//!               └──────────────┬───────────────┘
//!                              │
//!         Bucket = HashMap<SubscriberId, Interest>
//! ```
//!
//! A topic with an entry has at least one interest; empty entity buckets and
//! empty topics are removed as soon as their last interest goes away.

pub mod entry;
pub mod store;

pub use entry::{Callback, Interest, TopicStats};
pub use store::InterestRegistry;
