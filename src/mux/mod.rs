//! Public multiplexer API
//!
//! ```text
//!   subscribe()/unsubscribe()          inbound frame
//!            │                               │
//!            ▼                               ▼
//!   ┌─────────────────┐  empty ↔ non-empty  ┌────────┐
//!   │ InterestRegistry│────────────────────►│ Tracker│──► MessageBus
//!   └────────┬────────┘   (connected only)  └────────┘      │
//!            │                                   ▲          │
//!            │ snapshot                reconcile │          │
//!            ▼                          on connect          │
//!        router::dispatch ◄─────────────────────────────────┘
//! ```

pub mod multiplexer;

pub use multiplexer::Multiplexer;
