//! Inbound frame routing
//!
//! Decodes each frame, picks the interests it matches and invokes them:
//!
//! - `insert`: wildcard interests only, whatever `content.id` says
//! - `update` / `delete` with `content.id`: the entity's interests plus the
//!   wildcard interests
//! - `update` / `delete` without an id: wildcard interests only
//!
//! Callbacks run on a snapshot, outside every lock. A panicking callback is
//! contained and the rest of the dispatch continues.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::protocol::{DecodeError, EntityId, Envelope, Method, Topic};
use crate::registry::Interest;

/// Result of routing one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Callbacks that ran to completion
    pub delivered: usize,
    /// Callbacks that panicked
    pub failed: usize,
}

/// Entity id an envelope is routed by, if any
pub fn routing_entity(envelope: &Envelope) -> Option<EntityId> {
    match envelope.method {
        Method::Insert => None,
        Method::Update | Method::Delete => envelope.entity_id(),
    }
}

/// Decode a frame and deliver it to the matching interests
///
/// `select` is given the envelope's topic and routing entity and returns the
/// matching interests; it is expected to snapshot them and release any lock
/// before returning.
pub fn dispatch<F>(frame: &[u8], select: F) -> Result<(Envelope, DispatchOutcome), DecodeError>
where
    F: FnOnce(&Topic, Option<&EntityId>) -> Vec<Interest>,
{
    let envelope = Envelope::decode(frame)?;
    let topic = envelope.topic()?;
    let entity = routing_entity(&envelope);

    let interests = select(&topic, entity.as_ref());
    let outcome = deliver(&envelope, &interests);

    tracing::trace!(
        topic = %topic,
        entity = ?entity.as_ref().map(EntityId::as_str),
        delivered = outcome.delivered,
        failed = outcome.failed,
        "Frame dispatched"
    );

    Ok((envelope, outcome))
}

/// Invoke each interest, isolating panics per callback
pub fn deliver(envelope: &Envelope, interests: &[Interest]) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();

    for interest in interests {
        match catch_unwind(AssertUnwindSafe(|| interest.invoke(envelope))) {
            Ok(true) => outcome.delivered += 1,
            Ok(false) => {}
            Err(_) => {
                outcome.failed += 1;
                tracing::warn!(
                    table = %envelope.table,
                    method = %envelope.method,
                    subscriber = interest.subscriber_id(),
                    "Subscriber callback panicked"
                );
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::registry::{Callback, InterestRegistry};

    fn counting(counter: &Arc<AtomicUsize>) -> Callback {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &Envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn route(registry: &InterestRegistry, frame: &[u8]) -> Result<DispatchOutcome, DecodeError> {
        dispatch(frame, |topic, entity| registry.interests_for(topic, entity))
            .map(|(_, outcome)| outcome)
    }

    #[test]
    fn test_entity_fan_out() {
        let mut registry = InterestRegistry::new();
        let topic = Topic::new("Token", Method::Update).unwrap();
        let w = Arc::new(AtomicUsize::new(0));
        let s = Arc::new(AtomicUsize::new(0));

        registry.add(&topic, "W", None, counting(&w));
        registry.add(&topic, "S", Some(&EntityId::from("T1")), counting(&s));

        let outcome = route(
            &registry,
            br#"{"table":"Token","method":"update","content":{"id":"T1","minted":500}}"#,
        )
        .unwrap();
        assert_eq!(outcome.delivered, 2);
        assert_eq!((w.load(Ordering::SeqCst), s.load(Ordering::SeqCst)), (1, 1));

        route(
            &registry,
            br#"{"table":"Token","method":"update","content":{"id":"T2","minted":10}}"#,
        )
        .unwrap();
        assert_eq!((w.load(Ordering::SeqCst), s.load(Ordering::SeqCst)), (2, 1));

        route(&registry, br#"{"table":"Token","method":"update","content":{}}"#).unwrap();
        assert_eq!((w.load(Ordering::SeqCst), s.load(Ordering::SeqCst)), (3, 1));
    }

    #[test]
    fn test_insert_ignores_id() {
        let mut registry = InterestRegistry::new();
        let topic = Topic::new("Block", Method::Insert).unwrap();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let scoped = Arc::new(AtomicUsize::new(0));

        registry.add(&topic, "a", None, counting(&a));
        registry.add(&topic, "b", None, counting(&b));
        registry.add(&topic, "scoped", Some(&EntityId::from("9")), counting(&scoped));

        route(&registry, br#"{"table":"Block","method":"insert","content":{"id":9}}"#).unwrap();

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(scoped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_numeric_id_matches_string_interest() {
        let mut registry = InterestRegistry::new();
        let topic = Topic::new("Block", Method::Delete).unwrap();
        let s = Arc::new(AtomicUsize::new(0));

        registry.add(&topic, "s", Some(&EntityId::from("42")), counting(&s));
        route(&registry, br#"{"table":"Block","method":"delete","content":{"id":42}}"#).unwrap();

        assert_eq!(s.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let mut registry = InterestRegistry::new();
        let topic = Topic::new("Token", Method::Insert).unwrap();
        let after = Arc::new(AtomicUsize::new(0));

        registry.add(&topic, "bad", None, Arc::new(|_: &Envelope| panic!("subscriber bug")));
        registry.add(&topic, "good", None, counting(&after));

        let outcome =
            route(&registry, br#"{"table":"Token","method":"insert","content":{}}"#).unwrap();

        assert_eq!(outcome, DispatchOutcome { delivered: 1, failed: 1 });
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_frames() {
        let registry = InterestRegistry::new();

        assert!(matches!(route(&registry, b"\x00\x01"), Err(DecodeError::Json(_))));
        assert!(matches!(
            route(&registry, br#"{"table":"a/b","method":"insert","content":{}}"#),
            Err(DecodeError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_no_interests() {
        let registry = InterestRegistry::new();
        let outcome =
            route(&registry, br#"{"table":"Token","method":"insert","content":{}}"#).unwrap();
        assert_eq!(outcome, DispatchOutcome::default());
    }
}
