use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::collections::{Collections, take_where};
use super::config::SchedulerConfig;
use super::report::{MappingInfo, TickReport};
use crate::command::CommandListener;
use crate::error::{MappingError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::instances::InstanceRegistry;
use crate::mapping::{FailureNotifier, Mapping, MappingSpec, MappingState};
use crate::providers::SubscriptionProvider;

/// Lifecycle scheduler: owns every mapping and drives the watchdog tick.
///
/// Each tick runs, in order: zombie reclamation, removed-mapping reclamation,
/// failure requeue, admission, failure harvest, instance sweep, self-check
/// sweep and command polling, then publishes a [`TickReport`].
///
/// Every step runs under a panic guard; a panicking step is abandoned for
/// this tick and the loop continues.
pub struct Scheduler {
    cfg: SchedulerConfig,
    subscriptions: Arc<dyn SubscriptionProvider>,
    instances: Arc<InstanceRegistry>,
    bus: Bus,
    collections: Collections,
    next_id: AtomicU64,
    stop: CancellationToken,
}

impl Scheduler {
    pub fn new(
        cfg: SchedulerConfig,
        subscriptions: Arc<dyn SubscriptionProvider>,
        instances: Arc<InstanceRegistry>,
        bus: Bus,
    ) -> Self {
        Self {
            cfg,
            subscriptions,
            instances,
            bus,
            collections: Collections::default(),
            next_id: AtomicU64::new(1),
            stop: CancellationToken::new(),
        }
    }

    /// Runs ticks until [`forwarding_exit`](Self::forwarding_exit) is called.
    ///
    /// The stop signal is checked at the top of each tick; a tick in progress
    /// always completes.
    pub async fn run(&self, mut commands: Option<CommandListener>) {
        while !self.stop.is_cancelled() {
            self.tick(commands.as_mut()).await;
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.tick_interval) => {}
                _ = self.stop.cancelled() => {}
            }
        }
        tracing::info!("scheduler loop stopped");
    }

    /// Executes one tick.
    pub async fn tick(&self, commands: Option<&mut CommandListener>) -> TickReport {
        let now = Instant::now();

        self.guarded("reclaim_zombies", self.reclaim_zombies_at(now))
            .await;
        self.guarded("reclaim_deleted", self.reclaim_deleted_at(now))
            .await;
        self.guarded("requeue_failed", self.requeue_failed()).await;
        let started = self
            .guarded("admission", self.admit())
            .await
            .unwrap_or_default();
        self.guarded("harvest_failed", self.harvest_failed()).await;
        self.guarded("instance_sweep", self.sweep_instances()).await;
        self.guarded("self_check", self.self_check_sweep()).await;
        if let Some(listener) = commands {
            self.guarded("commands", listener.poll(self)).await;
        }

        let report = TickReport {
            started,
            ..self.sizes().await
        };
        tracing::info!(
            active = report.active,
            pending = report.pending,
            failed = report.failed,
            started = report.started,
            to_delete = report.to_delete,
            zombies = report.zombies,
            "tick"
        );
        self.bus
            .publish(Event::new(EventKind::TickCompleted).with_report(report));
        report
    }

    async fn guarded<T>(&self, step: &'static str, fut: impl Future<Output = T>) -> Option<T> {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(v) => Some(v),
            Err(payload) => {
                let info = panic_message(&*payload);
                tracing::warn!(step, panic = %info, "tick step panicked");
                self.bus.publish(
                    Event::new(EventKind::StepPanicked)
                        .with_reason(format!("step={step} panic={info}")),
                );
                None
            }
        }
    }

    pub(crate) async fn reclaim_zombies_at(&self, now: Instant) -> usize {
        let grace = self.cfg.zombie_grace;
        let reclaimed = {
            let mut zombies = self.collections.zombies.lock().await;
            take_where(&mut zombies, |m| m.can_be_cleaned_at(now, grace))
        };
        for m in &reclaimed {
            self.bus.publish(
                Event::new(EventKind::ZombieReclaimed)
                    .with_mapping(m.id())
                    .with_spec(m.spec()),
            );
        }
        reclaimed.len()
    }

    pub(crate) async fn reclaim_deleted_at(&self, now: Instant) -> usize {
        let grace = self.cfg.delete_grace;
        let reclaimed = {
            let mut to_delete = self.collections.to_delete.lock().await;
            take_where(&mut to_delete, |m| m.can_be_cleaned_at(now, grace))
        };
        for m in &reclaimed {
            self.bus.publish(
                Event::new(EventKind::RemovedReclaimed)
                    .with_mapping(m.id())
                    .with_spec(m.spec()),
            );
        }
        reclaimed.len()
    }

    /// Resubmits the spec of every failed mapping and quarantines the object.
    async fn requeue_failed(&self) -> usize {
        // Phase 1 (pending + failed): enqueue specs. Only the first `n`
        // entries are relocated below; anything harvested in between waits
        // for the next tick.
        let n = {
            let mut pending = self.collections.pending.lock().await;
            let failed = self.collections.failed.lock().await;
            pending.extend(failed.iter().map(|m| m.spec().clone()));
            failed.len()
        };
        if n == 0 {
            return 0;
        }

        // Phase 2 (failed + zombies): relocate, then stop in place.
        let now = Instant::now();
        let mut failed = self.collections.failed.lock().await;
        let mut zombies = self.collections.zombies.lock().await;
        let start = zombies.len();
        zombies.extend(failed.drain(..n).map(|mut m| {
            m.mark_removed(now);
            m
        }));
        for m in &mut zombies[start..] {
            m.stop_forwarding();
            self.bus.publish(
                Event::new(EventKind::MappingRequeued)
                    .with_mapping(m.id())
                    .with_spec(m.spec()),
            );
        }
        n
    }

    /// Starts up to `init_pool_max - initCount` pending specs, FIFO.
    async fn admit(&self) -> usize {
        let mut active = self.collections.active.lock().await;
        let init_count = active
            .iter()
            .filter(|m| m.state() == MappingState::Init)
            .count();
        let budget = self.cfg.init_pool_max.saturating_sub(init_count);
        if budget == 0 {
            return 0;
        }

        // One spec off the queue at a time; the rest stay queued.
        let mut started = 0;
        for _ in 0..budget {
            let Some(spec) = self.collections.pending.lock().await.pop_front() else {
                break;
            };
            if self.mapping_start(&mut active, spec) {
                started += 1;
            }
        }
        started
    }

    /// Admits one spec into `active` unless its channel is already there.
    fn mapping_start(&self, active: &mut Vec<Mapping>, spec: MappingSpec) -> bool {
        if active.iter().any(|m| m.channel() == spec.channel) {
            let reason = MappingError::DuplicateChannel {
                channel: spec.channel.clone(),
            };
            tracing::debug!(channel = %spec.channel, topic = %spec.topic, "{reason}, dropped");
            self.bus.publish(
                Event::new(EventKind::MappingDuplicate)
                    .with_spec(&spec)
                    .with_reason(reason.as_label()),
            );
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut mapping = Mapping::new(id, spec);
        if let Err(err) = mapping.start_forwarding(self.subscriptions.as_ref(), &self.instances) {
            tracing::warn!(
                mapping = id,
                channel = mapping.channel(),
                topic = mapping.topic(),
                error = %err,
                "mapping start failed"
            );
        }
        self.bus.publish(
            Event::new(EventKind::MappingStarted)
                .with_mapping(id)
                .with_spec(mapping.spec()),
        );
        active.push(mapping);
        true
    }

    async fn harvest_failed(&self) -> usize {
        let mut active = self.collections.active.lock().await;
        let mut failed = self.collections.failed.lock().await;
        let harvested = take_where(&mut active, |m| m.state() == MappingState::Failed);
        for m in &harvested {
            let reason = m.failure().map_or("unknown", MappingError::as_label);
            self.bus.publish(
                Event::new(EventKind::MappingFailed)
                    .with_mapping(m.id())
                    .with_spec(m.spec())
                    .with_reason(reason),
            );
        }
        let n = harvested.len();
        failed.extend(harvested);
        n
    }

    /// Retires fatal instances and asks the rest to check their topics.
    async fn sweep_instances(&self) -> usize {
        let every = self.cfg.instance_yield_every;
        let mut retired = 0;
        for (i, instance) in self.instances.snapshot().into_iter().enumerate() {
            if instance.has_fatal_error() {
                if self.instances.retire(instance.id()).is_some() {
                    retired += 1;
                    tracing::warn!(instance = instance.id(), "retiring broker instance");
                    self.bus
                        .publish(Event::new(EventKind::InstanceRetired).with_instance(instance.id()));
                }
            } else {
                instance.check_topic_health();
            }
            if every > 0 && (i + 1) % every == 0 {
                tokio::time::sleep(self.cfg.instance_yield_pause).await;
            }
        }
        retired
    }

    async fn self_check_sweep(&self) {
        let mut active = self.collections.active.lock().await;
        for m in active.iter_mut() {
            m.health_self_check();
        }
    }

    async fn sizes(&self) -> TickReport {
        TickReport {
            active: self.collections.active.lock().await.len(),
            pending: self.collections.pending.lock().await.len(),
            failed: self.collections.failed.lock().await.len(),
            started: 0,
            to_delete: self.collections.to_delete.lock().await.len(),
            zombies: self.collections.zombies.lock().await.len(),
        }
    }

    /// Appends a spec to the back of the pending queue.
    pub async fn mapping_add(&self, spec: MappingSpec) {
        self.bus
            .publish(Event::new(EventKind::MappingQueued).with_spec(&spec));
        self.collections.pending.lock().await.push_back(spec);
    }

    /// Stops and moves every active mapping publishing to `topic` into
    /// to-delete. Returns how many were removed.
    pub async fn mapping_remove_topic(&self, topic: &str) -> usize {
        let now = Instant::now();
        let mut active = self.collections.active.lock().await;
        let mut to_delete = self.collections.to_delete.lock().await;
        let start = to_delete.len();
        to_delete.extend(
            take_where(&mut active, |m| m.topic() == topic)
                .into_iter()
                .map(|mut m| {
                    m.mark_removed(now);
                    m
                }),
        );
        for m in &mut to_delete[start..] {
            m.stop_forwarding();
            self.bus.publish(
                Event::new(EventKind::MappingRemoved)
                    .with_mapping(m.id())
                    .with_spec(m.spec()),
            );
        }
        to_delete.len() - start
    }

    /// `(channel, topic)` of every active mapping, in insertion order.
    pub async fn mapping_list(&self) -> Vec<MappingSpec> {
        self.collections
            .active
            .lock()
            .await
            .iter()
            .map(|m| m.spec().clone())
            .collect()
    }

    /// Requests the loop to stop at the top of the next tick.
    pub fn forwarding_exit(&self) {
        if !self.stop.is_cancelled() {
            self.bus.publish(Event::new(EventKind::ExitRequested));
        }
        self.stop.cancel();
    }

    /// True once an exit was requested.
    pub fn exit_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stop signal shared with the runtime.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Stops every active mapping and moves it into to-delete.
    pub async fn shutdown(&self) -> usize {
        let now = Instant::now();
        let mut active = self.collections.active.lock().await;
        let mut to_delete = self.collections.to_delete.lock().await;
        let start = to_delete.len();
        to_delete.extend(active.drain(..).map(|mut m| {
            m.mark_removed(now);
            m
        }));
        for m in &mut to_delete[start..] {
            m.stop_forwarding();
        }
        let n = to_delete.len() - start;
        tracing::info!(stopped = n, "scheduler shut down");
        n
    }

    /// A thread-safe handle able to fail the active mapping of `channel`.
    pub async fn failure_notifier(&self, channel: &str) -> Option<FailureNotifier> {
        self.collections
            .active
            .lock()
            .await
            .iter()
            .find(|m| m.channel() == channel)
            .map(Mapping::failure_notifier)
    }

    /// Current collection sizes (`started` is always 0).
    pub async fn report(&self) -> TickReport {
        self.sizes().await
    }

    pub async fn active(&self) -> Vec<MappingInfo> {
        Self::infos(&self.collections.active.lock().await)
    }

    pub async fn failed(&self) -> Vec<MappingInfo> {
        Self::infos(&self.collections.failed.lock().await)
    }

    pub async fn to_delete(&self) -> Vec<MappingInfo> {
        Self::infos(&self.collections.to_delete.lock().await)
    }

    pub async fn zombies(&self) -> Vec<MappingInfo> {
        Self::infos(&self.collections.zombies.lock().await)
    }

    /// Pending specs, front first.
    pub async fn pending(&self) -> Vec<MappingSpec> {
        self.collections
            .pending
            .lock()
            .await
            .iter()
            .cloned()
            .collect()
    }

    fn infos(v: &[Mapping]) -> Vec<MappingInfo> {
        v.iter().map(MappingInfo::from).collect()
    }

    /// Instance registry shared with the mappings.
    pub fn instances(&self) -> &Arc<InstanceRegistry> {
        &self.instances
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }
}
