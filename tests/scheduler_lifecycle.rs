use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pvforward::providers::loopback::{LoopbackBroker, LoopbackSubscriptions};
use pvforward::{
    Bus, EventKind, InstanceRegistry, MappingError, MappingInfo, MappingSpec, MappingState,
    Scheduler, SchedulerConfig, command,
};

struct Harness {
    subs: LoopbackSubscriptions,
    broker: LoopbackBroker,
    bus: Bus,
    sched: Scheduler,
}

fn harness(cfg: SchedulerConfig) -> Harness {
    let subs = LoopbackSubscriptions::new().with_auto_connect(false);
    let broker = LoopbackBroker::new();
    let bus = Bus::new(1024);
    let instances = Arc::new(InstanceRegistry::new(Arc::new(broker.clone()), 1));
    let sched = Scheduler::new(cfg, Arc::new(subs.clone()), instances, bus.clone());
    Harness {
        subs,
        broker,
        bus,
        sched,
    }
}

fn cfg(init_pool_max: usize) -> SchedulerConfig {
    SchedulerConfig {
        init_pool_max,
        tick_interval: Duration::ZERO,
        instance_yield_pause: Duration::ZERO,
        ..SchedulerConfig::default()
    }
}

fn channels(infos: &[MappingInfo]) -> Vec<String> {
    infos.iter().map(|i| i.spec.channel.clone()).collect()
}

/// Every mapping object lives in exactly one collection, and active channels are unique.
async fn assert_invariants(sched: &Scheduler) {
    let active = sched.active().await;
    let mut ids = HashSet::new();
    for info in active
        .iter()
        .chain(sched.failed().await.iter())
        .chain(sched.to_delete().await.iter())
        .chain(sched.zombies().await.iter())
    {
        assert!(ids.insert(info.id), "mapping {} in two collections", info.id);
    }
    let unique: HashSet<_> = active.iter().map(|i| &i.spec.channel).collect();
    assert_eq!(unique.len(), active.len(), "duplicate active channel");
}

#[tokio::test]
async fn test_failed_mapping_is_revived_fifo() {
    let h = harness(cfg(2));
    for ch in ["a", "b", "c"] {
        h.sched.mapping_add(MappingSpec::new(ch, "T")).await;
    }

    let r = h.sched.tick(None).await;
    assert_eq!(r.started, 2);
    assert_eq!(channels(&h.sched.active().await), ["a", "b"]);
    assert_eq!(h.sched.pending().await, vec![MappingSpec::new("c", "T")]);
    let original = h.sched.active().await[0].id;

    let notifier = h.sched.failure_notifier("a").await.unwrap();
    assert!(notifier.go_into_failure_mode(MappingError::runtime("forced")));
    assert!(!notifier.go_into_failure_mode(MappingError::runtime("again")));

    // a no longer counts as Init, so c gets its slot; a is harvested.
    let r = h.sched.tick(None).await;
    assert_eq!(r.started, 1);
    assert_eq!(channels(&h.sched.active().await), ["b", "c"]);
    assert_eq!(h.sched.failed().await[0].id, original);
    assert_invariants(&h.sched).await;

    // a is quarantined and its spec goes to the back of pending.
    let r = h.sched.tick(None).await;
    assert_eq!((r.failed, r.zombies, r.pending), (0, 1, 1));
    assert_eq!(h.sched.zombies().await[0].id, original);
    assert_eq!(h.sched.pending().await, vec![MappingSpec::new("a", "T")]);
    assert_invariants(&h.sched).await;

    // Once b is Ready there is budget for the revived a.
    h.subs.connect("b");
    let r = h.sched.tick(None).await;
    assert_eq!(r.started, 1);
    let revived = h
        .sched
        .active()
        .await
        .into_iter()
        .find(|i| i.spec.channel == "a")
        .unwrap();
    assert_ne!(revived.id, original);
    assert_eq!(revived.state, MappingState::Init);
    assert_invariants(&h.sched).await;
}

#[tokio::test]
async fn test_revived_spec_queues_behind_waiting_specs() {
    let h = harness(cfg(2));
    for ch in ["a", "b", "p1", "p2", "p3"] {
        h.sched.mapping_add(MappingSpec::new(ch, "T")).await;
    }
    h.sched.tick(None).await;
    assert_eq!(channels(&h.sched.active().await), ["a", "b"]);

    let notifier = h.sched.failure_notifier("a").await.unwrap();
    assert!(notifier.go_into_failure_mode(MappingError::runtime("forced")));
    let r = h.sched.tick(None).await;
    assert_eq!((r.started, r.failed), (1, 1));

    // No slot left: a waits behind everything queued before it.
    let r = h.sched.tick(None).await;
    assert_eq!(r.started, 0);
    let expected: Vec<MappingSpec> = ["p2", "p3", "a"]
        .into_iter()
        .map(|ch| MappingSpec::new(ch, "T"))
        .collect();
    assert_eq!(h.sched.pending().await, expected);
    assert_invariants(&h.sched).await;
}

#[tokio::test]
async fn test_admission_admits_exactly_pool_size() {
    let n = 4;
    let h = harness(cfg(n));
    for i in 0..n + 5 {
        h.sched
            .mapping_add(MappingSpec::new(format!("pv{i}"), "T"))
            .await;
    }

    let r = h.sched.tick(None).await;
    assert_eq!(r.started, n);
    assert_eq!(r.pending, 5);
    assert!(
        h.sched
            .active()
            .await
            .iter()
            .all(|i| i.state == MappingState::Init)
    );
}

#[tokio::test]
async fn test_duplicate_add_leaves_active_unchanged() {
    let h = harness(cfg(8));
    h.sched.mapping_add(MappingSpec::new("X", "A")).await;
    h.sched.tick(None).await;

    let mut rx = h.bus.subscribe();
    h.sched.mapping_add(MappingSpec::new("X", "A")).await;
    let r = h.sched.tick(None).await;
    assert_eq!(r.active, 1);

    let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|ev| ev.kind)
        .collect();
    assert!(kinds.contains(&EventKind::MappingDuplicate));
    assert!(!kinds.contains(&EventKind::MappingStarted));
}

#[tokio::test]
async fn test_remove_topic_with_fan_in() {
    let h = harness(cfg(8));
    h.sched.mapping_add(MappingSpec::new("a", "A")).await;
    h.sched.mapping_add(MappingSpec::new("b", "A")).await;
    h.sched.tick(None).await;
    h.subs.connect("a");

    assert_eq!(h.sched.mapping_remove_topic("A").await, 2);
    assert!(h.sched.active().await.is_empty());
    let removed = h.sched.to_delete().await;
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|i| !i.forwarding));

    // Late values are not published.
    h.subs.post("a", b"1");
    assert_eq!(h.broker.message_count("A"), 0);
    assert_invariants(&h.sched).await;
}

#[tokio::test]
async fn test_values_flow_until_removed() {
    let h = harness(cfg(8));
    h.sched.mapping_add(MappingSpec::new("IOC:m1.DRBV", "IOC.m1")).await;
    h.sched.tick(None).await;

    h.subs.post("IOC:m1.DRBV", b"1.5");
    h.subs.post("IOC:m1.DRBV", b"1.6");
    assert_eq!(
        h.broker.messages("IOC.m1"),
        vec![b"1.5".to_vec(), b"1.6".to_vec()]
    );
    assert_eq!(h.sched.active().await[0].state, MappingState::Ready);
}

#[tokio::test]
async fn test_quarantined_objects_are_reclaimed_after_grace() {
    let h = harness(SchedulerConfig {
        zombie_grace: Duration::ZERO,
        delete_grace: Duration::ZERO,
        ..cfg(8)
    });
    h.sched.mapping_add(MappingSpec::new("a", "A")).await;
    h.sched.mapping_add(MappingSpec::new("b", "B")).await;
    h.sched.tick(None).await;

    h.subs.fail("a", "disconnected");
    h.sched.mapping_remove_topic("B").await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    h.sched.tick(None).await; // a harvested, b reclaimed
    h.sched.tick(None).await; // a quarantined and readmitted
    assert_eq!(h.sched.zombies().await.len(), 1);
    assert!(h.sched.to_delete().await.is_empty());

    tokio::time::sleep(Duration::from_millis(2)).await;
    let r = h.sched.tick(None).await;
    assert_eq!(r.zombies, 0);
    assert_eq!(r.active, 1);
}

#[tokio::test]
async fn test_retired_instance_fails_dependants_and_they_reconnect() {
    let h = harness(cfg(8));
    h.sched.mapping_add(MappingSpec::new("a", "T")).await;
    h.sched.tick(None).await;
    let first = h.sched.active().await[0].instance.unwrap();

    h.broker.poison_client(first);
    h.sched.tick(None).await; // instance retired, a self-checks into Failed
    assert!(h.sched.instances().is_empty());
    h.sched.tick(None).await; // a harvested
    h.sched.tick(None).await; // requeued and readmitted on a fresh instance

    let active = h.sched.active().await;
    assert_eq!(channels(&active), ["a"]);
    assert_ne!(active[0].instance, Some(first));
    assert_eq!(h.broker.client_count(), 2);
}

#[tokio::test]
async fn test_commands_drive_the_scheduler() {
    let h = harness(cfg(8));
    let (handle, mut listener) = command::channel(16, 16);

    handle
        .try_submit(r#"{"cmd":"add","channel":"a","topic":"T"}"#)
        .unwrap();
    handle
        .try_submit(r#"{"cmd":"mapping_add","channel":"b","topic":"T"}"#)
        .unwrap();
    handle.try_submit("garbage").unwrap();
    h.sched.tick(Some(&mut listener)).await;
    assert_eq!(h.sched.pending().await.len(), 2);

    h.sched.tick(Some(&mut listener)).await;
    assert_eq!(
        h.sched.mapping_list().await,
        vec![MappingSpec::new("a", "T"), MappingSpec::new("b", "T")]
    );

    handle
        .try_submit(r#"{"cmd":"remove","topic":"T"}"#)
        .unwrap();
    handle.try_submit(r#"{"cmd":"exit"}"#).unwrap();
    h.sched.tick(Some(&mut listener)).await;
    assert!(h.sched.mapping_list().await.is_empty());
    assert!(h.sched.exit_requested());

    // The loop observes the stop signal before ticking again.
    h.sched.run(Some(listener)).await;
    assert_eq!(h.sched.to_delete().await.len(), 2);
}
