use std::time::Duration;

/// Tunables of the tick loop.
///
/// Built from [`Config`](crate::Config) by the forwarder; tests construct it directly.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum number of active mappings allowed in `Init` at once.
    pub init_pool_max: usize,
    /// Minimum age of a zombie before it is dropped.
    pub zombie_grace: Duration,
    /// Minimum age of a removed mapping before it is dropped.
    pub delete_grace: Duration,
    /// Pause between ticks.
    pub tick_interval: Duration,
    /// Yield during the instance sweep after this many instances (0 disables).
    pub instance_yield_every: usize,
    /// Length of that yield.
    pub instance_yield_pause: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            init_pool_max: 64,
            zombie_grace: Duration::from_secs(45),
            delete_grace: Duration::from_secs(45),
            tick_interval: Duration::from_secs(1),
            instance_yield_every: 10,
            instance_yield_pause: Duration::from_millis(20),
        }
    }
}
