//! # Event subscribers.
//!
//! Runtime events are broadcast through the [`Bus`](crate::events::Bus); the
//! forwarder's listener hands every event to a [`SubscriberSet`], which fans it
//! out to each [`Subscribe`] implementation on its own worker.
//!
//! ```text
//!   Scheduler ── publish(Event) ──► Bus ──► SubscriberSet::emit
//!                                              ├──► LogWriter
//!                                              └──► Custom ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
