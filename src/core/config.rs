//! # Global runtime configuration.
//!
//! [`Config`] holds every startup constant of the forwarder. It is read from a
//! TOML file (all keys optional, missing keys take their defaults) and may be
//! overridden from the command line.
//!
//! ```toml
//! init_pool_max = 64
//! zombie_grace_secs = 45
//! tick_interval_ms = 1000
//!
//! [[mappings]]
//! channel = "IOC:m1.DRBV"
//! topic = "IOC.m1"
//! ```
//!
//! ## Sentinel values
//! - `instance_yield_every = 0` → the instance sweep never yields.
//! - `tick_interval_ms = 0` → ticks run back to back.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mapping::MappingSpec;
use crate::scheduler::SchedulerConfig;

/// Global configuration for the forwarder runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum number of mappings allowed to be initialising at once.
    pub init_pool_max: usize,

    /// Seconds a quarantined (zombie) mapping is kept before it is dropped.
    pub zombie_grace_secs: u64,

    /// Seconds a mapping removed by command is kept before it is dropped.
    pub delete_grace_secs: u64,

    /// Pause between scheduler ticks, in milliseconds.
    pub tick_interval_ms: u64,

    /// The instance sweep sleeps after this many instances.
    pub instance_yield_every: usize,

    /// Length of that sleep, in milliseconds.
    pub instance_yield_pause_ms: u64,

    /// Upper bound on broker-client instances.
    pub max_instances: usize,

    /// Capacity of the event bus ring buffer (min 1; clamped by Bus).
    pub bus_capacity: usize,

    /// Capacity of the command queue.
    pub command_queue_capacity: usize,

    /// Maximum commands applied per tick.
    pub command_batch_max: usize,

    /// Mappings queued at startup.
    pub mappings: Vec<MappingSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            init_pool_max: 64,
            zombie_grace_secs: 45,
            delete_grace_secs: 45,
            tick_interval_ms: 1000,
            instance_yield_every: 10,
            instance_yield_pause_ms: 20,
            max_instances: 1,
            bus_capacity: 1024,
            command_queue_capacity: 1024,
            command_batch_max: 64,
            mappings: Vec::new(),
        }
    }
}

impl Config {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("init_pool_max", self.init_pool_max),
            ("command_batch_max", self.command_batch_max),
            ("max_instances", self.max_instances),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);

        match zero {
            Some((name, _)) => Err(ConfigError::Invalid {
                reason: format!("{name} must be greater than 0"),
            }),
            None => Ok(()),
        }
    }

    pub fn zombie_grace(&self) -> Duration {
        Duration::from_secs(self.zombie_grace_secs)
    }

    pub fn delete_grace(&self) -> Duration {
        Duration::from_secs(self.delete_grace_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn instance_yield_pause(&self) -> Duration {
        Duration::from_millis(self.instance_yield_pause_ms)
    }

    /// Tick-loop tunables derived from this config.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            init_pool_max: self.init_pool_max,
            zombie_grace: self.zombie_grace(),
            delete_grace: self.delete_grace(),
            tick_interval: self.tick_interval(),
            instance_yield_every: self.instance_yield_every,
            instance_yield_pause: self.instance_yield_pause(),
        }
    }
}
