//! # LogWriter: events as `tracing` records
//!
//! Maps each [`EventKind`] to a log line with structured fields. Failures,
//! rejections and panics log at `warn`, lifecycle milestones at `info`, and
//! high-volume bookkeeping (queueing, duplicate drops, reclamation) at `debug`.
//! `TickCompleted` is skipped; the scheduler already logs its own summary.
//!
//! ```text
//! WARN mapping failed mapping=3 channel=IOC:m1.DRBV topic=IOC.m1 reason=mapping_runtime
//! INFO mapping removed mapping=5 channel=IOC:m2.DRBV topic=IOC.m2
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let channel = e.channel.as_deref().unwrap_or("");
        let topic = e.topic.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::MappingQueued => {
                tracing::debug!(channel, topic, "mapping queued");
            }
            EventKind::MappingDuplicate => {
                tracing::debug!(channel, topic, "duplicate channel dropped");
            }
            EventKind::MappingStarted => {
                tracing::info!(mapping = e.mapping, channel, topic, "mapping started");
            }
            EventKind::MappingFailed => {
                tracing::warn!(mapping = e.mapping, channel, topic, reason, "mapping failed");
            }
            EventKind::MappingRequeued => {
                tracing::info!(mapping = e.mapping, channel, topic, "mapping requeued");
            }
            EventKind::MappingRemoved => {
                tracing::info!(mapping = e.mapping, channel, topic, "mapping removed");
            }
            EventKind::ZombieReclaimed => {
                tracing::debug!(mapping = e.mapping, channel, topic, "zombie reclaimed");
            }
            EventKind::RemovedReclaimed => {
                tracing::debug!(mapping = e.mapping, channel, topic, "removed mapping reclaimed");
            }
            EventKind::InstanceRetired => {
                tracing::warn!(instance = e.instance, "broker instance retired");
            }
            EventKind::CommandRejected => {
                tracing::warn!(reason, "command rejected");
            }
            EventKind::StepPanicked => {
                tracing::warn!(reason, "scheduler step panicked");
            }
            EventKind::ExitRequested => {
                tracing::info!("exit requested");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("shutdown requested");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                tracing::warn!(reason, "subscriber panicked");
            }
            EventKind::TickCompleted => {}
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
