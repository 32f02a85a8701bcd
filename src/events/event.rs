//! # Runtime events emitted by the scheduler and the forwarder runtime.
//!
//! [`EventKind`] classifies events into:
//! - **Mapping events**: queue, start, duplicate drop, failure, requeue, removal;
//! - **Reclamation events**: zombie and removed mappings dropped after grace;
//! - **Runtime events**: instance retirement, command rejection, step panics,
//!   tick summaries, exit and shutdown;
//! - **Subscriber events**: overflow and panic in event subscribers.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use pvforward::{Event, EventKind, MappingSpec};
//!
//! let ev = Event::new(EventKind::MappingFailed)
//!     .with_mapping(7)
//!     .with_spec(&MappingSpec::new("IOC:m1.DRBV", "IOC.m1"))
//!     .with_reason("mapping_runtime");
//!
//! assert_eq!(ev.kind, EventKind::MappingFailed);
//! assert_eq!(ev.channel.as_deref(), Some("IOC:m1.DRBV"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::mapping::MappingSpec;
use crate::scheduler::TickReport;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Mapping events ===
    /// A spec was appended to the pending queue.
    ///
    /// Sets: `channel`, `topic`
    MappingQueued,

    /// A mapping was admitted into active and started.
    ///
    /// Sets: `mapping`, `channel`, `topic`
    MappingStarted,

    /// Admission dropped a spec because its channel is already active.
    ///
    /// Sets: `channel`, `topic`
    MappingDuplicate,

    /// A failed mapping was harvested from active.
    ///
    /// Sets: `mapping`, `channel`, `topic`, `reason` (failure label)
    MappingFailed,

    /// A failed mapping was quarantined and its spec resubmitted.
    ///
    /// Sets: `mapping` (the quarantined one), `channel`, `topic`
    MappingRequeued,

    /// A mapping was removed by command.
    ///
    /// Sets: `mapping`, `channel`, `topic`
    MappingRemoved,

    // === Reclamation ===
    /// A zombie was dropped after its grace period.
    ///
    /// Sets: `mapping`, `channel`, `topic`
    ZombieReclaimed,

    /// A removed mapping was dropped after its grace period.
    ///
    /// Sets: `mapping`, `channel`, `topic`
    RemovedReclaimed,

    // === Runtime ===
    /// A broker instance reported a fatal error and was retired.
    ///
    /// Sets: `instance`
    InstanceRetired,

    /// A control message could not be decoded.
    ///
    /// Sets: `reason`
    CommandRejected,

    /// A tick step panicked and was abandoned for this tick.
    ///
    /// Sets: `reason` (step name and panic message)
    StepPanicked,

    /// One scheduler tick finished.
    ///
    /// Sets: `report`
    TickCompleted,

    /// `exit` was requested; the loop stops at the top of the next tick.
    ExitRequested,

    /// An OS termination signal was observed.
    ShutdownRequested,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (subscriber name and cause)
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason`
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Mapping id, if applicable.
    pub mapping: Option<u64>,
    /// Broker instance id, if applicable.
    pub instance: Option<u64>,
    /// Channel name, if applicable.
    pub channel: Option<Arc<str>>,
    /// Topic name, if applicable.
    pub topic: Option<Arc<str>>,
    /// Human-readable reason (failure label, panic message, ...).
    pub reason: Option<Arc<str>>,
    /// Collection sizes (only for `TickCompleted`).
    pub report: Option<TickReport>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            mapping: None,
            instance: None,
            channel: None,
            topic: None,
            reason: None,
            report: None,
        }
    }

    /// Attaches a mapping id.
    #[inline]
    pub fn with_mapping(mut self, id: u64) -> Self {
        self.mapping = Some(id);
        self
    }

    /// Attaches a broker instance id.
    #[inline]
    pub fn with_instance(mut self, id: u64) -> Self {
        self.instance = Some(id);
        self
    }

    /// Attaches channel and topic.
    #[inline]
    pub fn with_spec(mut self, spec: &MappingSpec) -> Self {
        self.channel = Some(Arc::from(spec.channel.as_str()));
        self.topic = Some(Arc::from(spec.topic.as_str()));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a tick report.
    #[inline]
    pub fn with_report(mut self, report: TickReport) -> Self {
        self.report = Some(report);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }
}
