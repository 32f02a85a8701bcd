//! # Lifecycle scheduler.
//!
//! The [`Scheduler`] owns every mapping and moves it between five collections:
//!
//! ```text
//!   mapping_add ──► pending ──admission──► active ──harvest──► failed
//!                     ▲                      │                    │
//!                     └──── requeue (spec) ──┼────────────────────┤
//!                                            │                    ▼
//!               mapping_remove_topic ──► to_delete            zombies
//!                                            │                    │
//!                                            └── grace elapsed ───┴──► dropped
//! ```
//!
//! A failed mapping is never restarted: its spec goes back to the end of
//! `pending` and the object is quarantined as a zombie until late
//! subscription callbacks can no longer reach it.

mod collections;
mod config;
mod core;
mod report;

pub use self::core::Scheduler;
pub use config::SchedulerConfig;
pub use report::{MappingInfo, TickReport};
