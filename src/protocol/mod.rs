//! Topic and envelope types shared by the registry, tracker and router

pub mod envelope;
pub mod topic;

pub use envelope::{DecodeError, EntityId, Envelope};
pub use topic::{Method, Topic};
