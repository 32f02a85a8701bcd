use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::sink::{HealthSignal, MappingSink, Shared};
use super::spec::MappingSpec;
use super::state::MappingState;
use crate::error::{MappingError, panic_message};
use crate::instances::{Instance, InstanceRegistry};
use crate::providers::{Subscription, SubscriptionProvider};

/// Live binding of one channel to one topic.
///
/// Owned by exactly one scheduler collection at a time and moved (never
/// cloned) between them. The subscription handle stays inside the mapping
/// until the mapping is dropped, which only happens after the grace period.
pub struct Mapping {
    id: u64,
    spec: MappingSpec,
    shared: Arc<Shared>,
    subscription: Option<Box<dyn Subscription>>,
    close_requested: bool,
    instance: Weak<Instance>,
    instance_id: Option<u64>,
    signals_tx: mpsc::UnboundedSender<HealthSignal>,
    signals: mpsc::UnboundedReceiver<HealthSignal>,
    created_at: Instant,
    removed_at: Option<Instant>,
}

impl Mapping {
    /// Creates a mapping in `Init`; nothing is acquired until [`start_forwarding`](Self::start_forwarding).
    pub fn new(id: u64, spec: MappingSpec) -> Self {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        Self {
            id,
            spec,
            shared: Shared::new(),
            subscription: None,
            close_requested: false,
            instance: Weak::new(),
            instance_id: None,
            signals_tx,
            signals,
            created_at: Instant::now(),
            removed_at: None,
        }
    }

    /// Acquires the publish target and the subscription.
    ///
    /// Call once, right after construction. On error the mapping is already
    /// `Failed` (with `failed_at` recorded) and the error is returned for logging.
    /// A panicking provider counts as a runtime failure.
    pub fn start_forwarding(
        &mut self,
        subscriptions: &dyn SubscriptionProvider,
        instances: &InstanceRegistry,
    ) -> Result<(), MappingError> {
        let res = panic::catch_unwind(AssertUnwindSafe(|| self.acquire(subscriptions, instances)))
            .unwrap_or_else(|payload| {
                Err(MappingError::runtime(format!(
                    "start panicked: {}",
                    panic_message(&*payload)
                )))
            });
        if let Err(err) = &res {
            self.shared.go_into_failure_mode(self.id, err.clone());
        }
        res
    }

    fn acquire(
        &mut self,
        subscriptions: &dyn SubscriptionProvider,
        instances: &InstanceRegistry,
    ) -> Result<(), MappingError> {
        let instance = instances.acquire()?;
        let target = instance.client().open_target(&self.spec.topic)?;
        *self.shared.target.lock() = Some(target);
        self.instance = Arc::downgrade(&instance);
        self.instance_id = Some(instance.id());

        let sink = Arc::new(MappingSink {
            id: self.id,
            shared: Arc::clone(&self.shared),
            signals: self.signals_tx.clone(),
        });
        self.subscription = Some(subscriptions.open(&self.spec.channel, sink)?);
        Ok(())
    }

    /// Disables forwarding, releases the publish handle and requests the
    /// subscription to close. Callbacks may still arrive afterwards; they see
    /// forwarding disabled and return.
    pub fn stop_forwarding(&mut self) {
        self.shared.health.disable_forwarding();
        self.shared.target.lock().take();
        self.request_close();
    }

    /// Calls `close` at most once. A panicking provider is logged, not propagated,
    /// so a mapping being moved or dropped never unwinds its caller.
    fn request_close(&mut self) {
        if std::mem::replace(&mut self.close_requested, true) {
            return;
        }
        let Some(sub) = &self.subscription else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| sub.close())) {
            tracing::warn!(
                mapping = self.id,
                channel = %self.spec.channel,
                panic = %panic_message(&*payload),
                "subscription close panicked"
            );
        }
    }

    /// Turns accumulated error signals and a lost broker instance into `Failed`.
    pub fn health_self_check(&mut self) {
        if self.state() == MappingState::Failed {
            return;
        }

        let mut first: Option<HealthSignal> = None;
        while let Ok(sig) = self.signals.try_recv() {
            first.get_or_insert(sig);
        }
        if let Some(HealthSignal::PublishFailed(err)) = first {
            self.shared
                .go_into_failure_mode(self.id, MappingError::runtime(err.to_string()));
            return;
        }

        if let Some(instance_id) = self.instance_id {
            let lost = self
                .instance
                .upgrade()
                .is_none_or(|inst| inst.has_fatal_error());
            if lost {
                self.shared.go_into_failure_mode(
                    self.id,
                    MappingError::InstanceFatal {
                        instance: instance_id,
                    },
                );
            }
        }
    }

    /// Callable from any thread via [`FailureNotifier`]; idempotent.
    pub fn go_into_failure_mode(&self, reason: MappingError) -> bool {
        self.shared.go_into_failure_mode(self.id, reason)
    }

    /// A handle that can fail this mapping from another thread.
    pub fn failure_notifier(&self) -> FailureNotifier {
        FailureNotifier {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// True once more than `grace` has elapsed since the mapping was quarantined.
    pub fn zombie_can_be_cleaned(&self, grace: Duration) -> bool {
        self.can_be_cleaned_at(Instant::now(), grace)
    }

    pub(crate) fn can_be_cleaned_at(&self, now: Instant, grace: Duration) -> bool {
        self.removed_at
            .is_some_and(|at| now.saturating_duration_since(at) > grace)
    }

    pub(crate) fn mark_removed(&mut self, at: Instant) {
        self.removed_at = Some(at);
    }

    /// Diagnostic id, assigned at admission.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Channel/topic pair.
    pub fn spec(&self) -> &MappingSpec {
        &self.spec
    }

    /// Channel (PV) name.
    pub fn channel(&self) -> &str {
        &self.spec.channel
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.spec.topic
    }

    /// Current health state.
    pub fn state(&self) -> MappingState {
        self.shared.health.state()
    }

    /// True while values are being published.
    pub fn forwarding_enabled(&self) -> bool {
        self.shared.health.forwarding_enabled()
    }

    /// First failure reason, if failed.
    pub fn failure(&self) -> Option<&MappingError> {
        self.shared.health.failure()
    }

    /// Registry id of the broker instance carrying this mapping.
    pub fn instance_id(&self) -> Option<u64> {
        self.instance_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn failed_at(&self) -> Option<Instant> {
        self.shared.health.failed_at()
    }

    /// When the mapping was quarantined (zombie) or removed by command.
    pub fn removed_at(&self) -> Option<Instant> {
        self.removed_at
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        self.request_close();
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("id", &self.id)
            .field("channel", &self.spec.channel)
            .field("topic", &self.spec.topic)
            .field("state", &self.state())
            .field("forwarding", &self.forwarding_enabled())
            .finish()
    }
}

/// Cloneable, thread-safe handle that can push a mapping into failure mode.
#[derive(Clone)]
pub struct FailureNotifier {
    id: u64,
    shared: Arc<Shared>,
}

impl FailureNotifier {
    /// Same as [`Mapping::go_into_failure_mode`].
    pub fn go_into_failure_mode(&self, reason: MappingError) -> bool {
        self.shared.go_into_failure_mode(self.id, reason)
    }

    /// Id of the mapping this handle belongs to.
    pub fn mapping_id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::providers::loopback::{LoopbackBroker, LoopbackSubscriptions};

    fn fixture() -> (LoopbackSubscriptions, LoopbackBroker, InstanceRegistry) {
        let subs = LoopbackSubscriptions::new().with_auto_connect(false);
        let broker = LoopbackBroker::new();
        let reg = InstanceRegistry::new(Arc::new(broker.clone()), 1);
        (subs, broker, reg)
    }

    #[test]
    fn test_start_then_forward_marks_ready() {
        let (subs, broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();
        assert_eq!(m.state(), MappingState::Init);

        assert_eq!(subs.post("pv:a", b"42"), 1);
        assert_eq!(m.state(), MappingState::Ready);
        assert_eq!(broker.messages("T"), vec![b"42".to_vec()]);
    }

    #[test]
    fn test_acquisition_failure_fails_fast() {
        let (subs, broker, reg) = fixture();
        broker.reject_topic("T", true);
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        let err = m.start_forwarding(&subs, &reg).unwrap_err();

        assert_eq!(err.as_label(), "mapping_acquisition");
        assert_eq!(m.state(), MappingState::Failed);
        assert!(m.failed_at().is_some());
        assert_eq!(subs.opened_total(), 0);
    }

    #[test]
    fn test_stop_forwarding_ignores_trailing_callbacks() {
        let (subs, broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();
        let notifier = m.failure_notifier();

        m.stop_forwarding();
        assert!(!m.forwarding_enabled());
        assert_eq!(subs.open_count("pv:a"), 0);
        // A late callback through a retained handle must not publish.
        notifier.go_into_failure_mode(MappingError::runtime("late"));
        assert_eq!(broker.message_count("T"), 0);
    }

    #[test]
    fn test_transient_publish_error_fails_on_self_check() {
        let (subs, broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();

        broker.inject_publish_fault("T", PublishError::Transient { reason: "queue full".into() });
        subs.post("pv:a", b"1");
        assert_eq!(m.state(), MappingState::Init);

        m.health_self_check();
        assert_eq!(m.state(), MappingState::Failed);
        assert_eq!(m.failure().map(MappingError::as_label), Some("mapping_runtime"));
    }

    #[test]
    fn test_fatal_publish_error_fails_from_callback() {
        let (subs, broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();

        broker.inject_publish_fault("T", PublishError::Fatal { reason: "gone".into() });
        subs.post("pv:a", b"1");
        assert_eq!(m.state(), MappingState::Failed);
        assert!(!m.forwarding_enabled());
    }

    #[test]
    fn test_subscription_error_fails_mapping() {
        let (subs, _broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();
        subs.connect("pv:a");
        assert_eq!(m.state(), MappingState::Ready);

        subs.fail("pv:a", "disconnected");
        assert_eq!(m.state(), MappingState::Failed);
    }

    #[test]
    fn test_retired_instance_detected_by_self_check() {
        let (subs, _broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();
        m.health_self_check();
        assert_eq!(m.state(), MappingState::Init);

        let id = m.instance_id().unwrap();
        drop(reg.retire(id));
        m.health_self_check();
        assert_eq!(m.state(), MappingState::Failed);
        assert_eq!(
            m.failure(),
            Some(&MappingError::InstanceFatal { instance: id })
        );
    }

    #[test]
    fn test_grace_period_predicate() {
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        let grace = Duration::from_secs(10);
        assert!(!m.zombie_can_be_cleaned(grace));

        let now = Instant::now();
        m.mark_removed(now - Duration::from_secs(9));
        assert!(!m.can_be_cleaned_at(now, grace));
        m.mark_removed(now - Duration::from_secs(11));
        assert!(m.can_be_cleaned_at(now, grace));
    }

    #[test]
    fn test_drop_closes_open_subscription() {
        let (subs, _broker, reg) = fixture();
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&subs, &reg).unwrap();
        assert_eq!(subs.open_count("pv:a"), 1);
        drop(m);
        assert_eq!(subs.open_count("pv:a"), 0);
    }

    struct PanicOnClose(Arc<std::sync::atomic::AtomicUsize>);

    impl Subscription for PanicOnClose {
        fn close(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            panic!("close bug");
        }
    }

    struct PanicOnCloseProvider(Arc<std::sync::atomic::AtomicUsize>);

    impl SubscriptionProvider for PanicOnCloseProvider {
        fn open(
            &self,
            _channel: &str,
            _sink: Arc<dyn crate::providers::UpdateSink>,
        ) -> Result<Box<dyn Subscription>, crate::error::AcquireError> {
            Ok(Box::new(PanicOnClose(Arc::clone(&self.0))))
        }
    }

    #[test]
    fn test_panicking_close_is_contained_and_not_repeated() {
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (_subs, _broker, reg) = fixture();
        let provider = PanicOnCloseProvider(Arc::clone(&closes));
        let mut m = Mapping::new(1, MappingSpec::new("pv:a", "T"));
        m.start_forwarding(&provider, &reg).unwrap();

        m.stop_forwarding();
        assert!(!m.forwarding_enabled());
        drop(m);
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
