//! Runtime core: configuration and process lifecycle.
//!
//! - [`config`]: startup constants, TOML loading and validation;
//! - [`forwarder`]: runs the scheduler, fans out events, handles shutdown;
//! - [`builder`]: assembles a [`Forwarder`] from config and providers;
//! - [`shutdown`]: OS termination signals.

mod builder;
mod config;
mod forwarder;
mod shutdown;

pub use builder::ForwarderBuilder;
pub use config::Config;
pub use forwarder::Forwarder;
