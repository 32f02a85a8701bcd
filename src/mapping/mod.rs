//! # Mappings: one channel forwarded into one topic.
//!
//! A [`Mapping`] owns a subscription handle and a publish handle and carries
//! its own health state machine. Failure is terminal for the object: the
//! scheduler quarantines a failed mapping as a zombie and submits a fresh
//! mapping with the same [`MappingSpec`].
//!
//! ## Threads
//! ```text
//! provider thread ──► MappingSink::on_value ──► PublishTarget::publish
//!        │                   │ transient error ──► mailbox ──┐
//!        │                   └ fatal error ─────────┐        │
//!        └──► MappingSink::on_error ────────────────┤        │
//!                                                   ▼        ▼
//!                                        Health (atomics) ◄── Mapping::health_self_check
//!                                                             (scheduler thread)
//! ```
//!
//! Both paths converge on one atomic transition, so a mapping fails exactly once.

mod core;
mod sink;
mod spec;
mod state;

pub use self::core::{FailureNotifier, Mapping};
pub use spec::MappingSpec;
pub use state::MappingState;
