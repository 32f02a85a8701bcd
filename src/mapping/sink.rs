use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::state::Health;
use crate::error::{MappingError, PublishError};
use crate::providers::{PublishTarget, UpdateSink};

/// Error signal queued by the callback path for the next self-check.
#[derive(Debug)]
pub(crate) enum HealthSignal {
    PublishFailed(PublishError),
}

/// State reachable from both the mapping and provider callbacks.
pub(crate) struct Shared {
    pub(crate) health: Health,
    pub(crate) target: Mutex<Option<Arc<dyn PublishTarget>>>,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            health: Health::new(),
            target: Mutex::new(None),
        })
    }

    /// Idempotent; safe from any thread. Touches atomics only.
    pub(crate) fn go_into_failure_mode(&self, id: u64, reason: MappingError) -> bool {
        let label = reason.as_label();
        let first = self.health.fail(reason);
        if first {
            tracing::debug!(mapping = id, reason = label, "mapping entered failure mode");
        }
        first
    }
}

/// Callback side of a mapping, handed to the subscription provider.
pub(crate) struct MappingSink {
    pub(crate) id: u64,
    pub(crate) shared: Arc<Shared>,
    pub(crate) signals: mpsc::UnboundedSender<HealthSignal>,
}

impl UpdateSink for MappingSink {
    fn on_connected(&self) {
        self.shared.health.mark_ready();
    }

    fn on_value(&self, payload: &[u8]) {
        if !self.shared.health.forwarding_enabled() {
            return;
        }
        // Clone out of the slot; never publish while holding the lock.
        let Some(target) = self.shared.target.lock().clone() else {
            return;
        };
        match target.publish(payload) {
            Ok(()) => {
                self.shared.health.mark_ready();
            }
            Err(err) if err.is_fatal() => {
                self.shared
                    .go_into_failure_mode(self.id, MappingError::runtime(err.to_string()));
            }
            Err(err) => {
                // Receiver gone means the mapping is being dropped.
                let _ = self.signals.send(HealthSignal::PublishFailed(err));
            }
        }
    }

    fn on_error(&self, reason: &str) {
        self.shared.go_into_failure_mode(
            self.id,
            MappingError::runtime(format!("subscription error: {reason}")),
        );
    }
}
