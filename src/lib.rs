//! # pvforward
//!
//! Forwards live process-variable (PV) updates into message-broker topics and
//! keeps every channel → topic binding alive through a supervised lifecycle.
//!
//! ## Architecture
//! ```text
//!   CommandHandle ──► [command queue] ─┐
//!   Config.mappings ───────────────────┤
//!                                      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Scheduler (one tick per interval)                                │
//! │   pending ─► active ─► failed ─► zombies       active ─► to_delete │
//! │   admission bounded by init_pool_max, FIFO requeue, grace GC      │
//! └──────┬──────────────────────────┬─────────────────────────────────┘
//!        │ start_forwarding         │ sweep
//!        ▼                          ▼
//!   Mapping ◄── callbacks ──  SubscriptionProvider     InstanceRegistry
//!     │  (Health, mailbox)                               │
//!     └──── publish ──► PublishTarget ◄── BrokerClient ◄─┘
//!
//!   Scheduler ── publish(Event) ──► Bus ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ### Mapping lifecycle
//! ```text
//! Init ──► Ready ──► Failed ──(harvest)──► failed ──(requeue)──► zombie
//!   └────────────────┘                         │
//!                                              └─ spec appended to pending,
//!                                                 a new object is admitted later
//! ```
//!
//! A mapping is never restarted in place. Subscription callbacks may still
//! arrive after `close()`, so a stopped mapping is kept (as a zombie or in
//! to-delete) for a grace period before it is dropped.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use pvforward::{Config, ForwarderBuilder, MappingSpec};
//! use pvforward::providers::loopback::{LoopbackBroker, LoopbackSubscriptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config {
//!         mappings: vec![MappingSpec::new("IOC:m1.DRBV", "IOC.m1")],
//!         ..Config::default()
//!     };
//!     let fwd = ForwarderBuilder::new(
//!         cfg,
//!         Arc::new(LoopbackSubscriptions::new()),
//!         Arc::new(LoopbackBroker::new()),
//!     )
//!     .build()?;
//!
//!     fwd.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//! - `logging` (default): exports [`LogWriter`], a subscriber writing events
//!   as `tracing` records.

pub mod command;
mod core;
mod error;
pub mod events;
pub mod instances;
pub mod mapping;
pub mod providers;
pub mod scheduler;
pub mod subscribers;
pub mod telemetry;

pub use self::core::{Config, Forwarder, ForwarderBuilder};
pub use command::{Command, CommandHandle, CommandListener, Reply, SubmitError};
pub use error::{
    AcquireError, CommandError, ConfigError, MappingError, PublishError, RuntimeError,
};
pub use events::{Bus, Event, EventKind};
pub use instances::{Instance, InstanceRegistry};
pub use mapping::{FailureNotifier, Mapping, MappingSpec, MappingState};
pub use scheduler::{MappingInfo, Scheduler, SchedulerConfig, TickReport};
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
pub use subscribers::{Subscribe, SubscriberSet};
