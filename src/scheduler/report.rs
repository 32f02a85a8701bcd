//! Per-tick diagnostics and read-only mapping views.

use std::fmt;

use crate::mapping::{Mapping, MappingSpec, MappingState};

/// Collection sizes at the end of one tick.
///
/// `started` counts the mappings admitted during that tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub active: usize,
    pub pending: usize,
    pub failed: usize,
    pub started: usize,
    pub to_delete: usize,
    pub zombies: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active={} pending={} failed={} started={} to_delete={} zombies={}",
            self.active, self.pending, self.failed, self.started, self.to_delete, self.zombies
        )
    }
}

/// Snapshot of one mapping, detached from the scheduler's collections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingInfo {
    pub id: u64,
    pub spec: MappingSpec,
    pub state: MappingState,
    pub forwarding: bool,
    pub instance: Option<u64>,
}

impl From<&Mapping> for MappingInfo {
    fn from(m: &Mapping) -> Self {
        Self {
            id: m.id(),
            spec: m.spec().clone(),
            state: m.state(),
            forwarding: m.forwarding_enabled(),
            instance: m.instance_id(),
        }
    }
}
