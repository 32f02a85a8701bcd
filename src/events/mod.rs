//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Scheduler` (mapping lifecycle, reclamation, ticks),
//!   `CommandListener` (rejections), `Forwarder` (shutdown), `SubscriberSet`
//!   workers (overflow/panic).
//! - **Consumers**: `Forwarder::subscriber_listener()` fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
