use std::fmt;

use serde::{Deserialize, Serialize};

/// Desired binding of one channel (PV) to one topic.
///
/// Plain value: the same pair may be submitted many times over the lifetime of
/// the forwarder (every failed mapping is resubmitted with its spec).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingSpec {
    /// Channel (process variable) name.
    pub channel: String,
    /// Destination topic.
    pub topic: String,
}

impl MappingSpec {
    /// Creates a new spec.
    pub fn new(channel: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            topic: topic.into(),
        }
    }

    /// Generates `n` synthetic specs `pv.NNNNNN -> pv.NNNNNN` for load testing.
    ///
    /// Topic indices are capped at 4, so channels 4.. all fan into `pv.000004`.
    pub fn synthetic(n: usize) -> Vec<Self> {
        (0..n)
            .map(|i| Self::new(format!("pv.{i:06}"), format!("pv.{:06}", i.min(4))))
            .collect()
    }
}

impl fmt::Display for MappingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.channel, self.topic)
    }
}
