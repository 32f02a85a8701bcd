//! # Forwarder: wires the scheduler, event fan-out and shutdown.
//!
//! ```text
//! run():
//!   config.mappings ──► Scheduler::mapping_add (seed)
//!   subscriber_listener(): Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!
//!   join:
//!     Scheduler::run(CommandListener)          tick loop until stop token fires
//!     shutdown::wait_for_shutdown_signal()
//!         └─► Bus.publish(ShutdownRequested) ─► stop token
//!
//!   then:
//!     Scheduler::shutdown()                    active ─► to_delete, forwarding off
//!     listener drains the bus, SubscriberSet::shutdown()
//! ```
//!
//! An `exit` command and an OS signal share the same stop token, so both let
//! the current tick finish before the loop returns.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{config::Config, shutdown};
use crate::command::{CommandHandle, CommandListener};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::scheduler::Scheduler;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Owns the runtime pieces of one forwarding process.
pub struct Forwarder {
    cfg: Config,
    bus: Bus,
    scheduler: Arc<Scheduler>,
    commands: CommandHandle,
    listener: Mutex<Option<CommandListener>>,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
}

impl Forwarder {
    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        scheduler: Arc<Scheduler>,
        commands: CommandHandle,
        listener: CommandListener,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            scheduler,
            commands,
            listener: Mutex::new(Some(listener)),
            subscribers: Mutex::new(subscribers),
        }
    }

    /// Runs until an `exit` command, [`stop`](Self::stop) or an OS signal.
    ///
    /// Can be called once.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(RuntimeError::AlreadyRunning)?;

        let events_token = CancellationToken::new();
        let events = self.subscriber_listener(events_token.clone());

        for spec in &self.cfg.mappings {
            self.scheduler.mapping_add(spec.clone()).await;
        }
        tracing::info!(
            mappings = self.cfg.mappings.len(),
            init_pool_max = self.cfg.init_pool_max,
            tick_interval_ms = self.cfg.tick_interval_ms,
            "forwarder started"
        );

        let stop = self.scheduler.stop_token();
        let signals = async {
            tokio::select! {
                res = shutdown::wait_for_shutdown_signal() => {
                    if let Err(err) = res {
                        stop.cancel();
                        return Err(err);
                    }
                    self.bus.publish(Event::new(EventKind::ShutdownRequested));
                    stop.cancel();
                }
                _ = stop.cancelled() => {}
            }
            Ok(())
        };
        let ((), outcome) = tokio::join!(self.scheduler.run(Some(listener)), signals);

        self.scheduler.shutdown().await;
        events_token.cancel();
        join_listener(events).await;
        outcome
    }

    /// Forwards bus events to the subscriber set until `token` fires, then
    /// drains what is left and shuts the set down.
    fn subscriber_listener(&self, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(std::mem::take(&mut *self.subscribers.lock()), self.bus.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => set.emit(&ev),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            set.shutdown().await;
        })
    }

    /// Requests the scheduler loop to stop after the current tick.
    pub fn stop(&self) {
        self.scheduler.forwarding_exit();
    }

    /// Handle for submitting control messages.
    pub fn commands(&self) -> CommandHandle {
        self.commands.clone()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }
}

/// Waits for the event listener task. A panicked or cancelled task is logged.
async fn join_listener(events: JoinHandle<()>) -> bool {
    match events.await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, panicked = err.is_panic(), "event listener task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::ForwarderBuilder;
    use crate::mapping::MappingSpec;
    use crate::providers::loopback::{LoopbackBroker, LoopbackSubscriptions};

    struct Ticks(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscribe for Ticks {
        async fn on_event(&self, ev: &Event) {
            if ev.kind == EventKind::TickCompleted {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn forwarder(subs: LoopbackSubscriptions, ticks: Arc<AtomicUsize>) -> Arc<Forwarder> {
        let cfg = Config {
            tick_interval_ms: 1,
            mappings: vec![MappingSpec::new("pv:a", "T")],
            ..Config::default()
        };
        ForwarderBuilder::new(cfg, Arc::new(subs), Arc::new(LoopbackBroker::new()))
            .with_subscribers(vec![Arc::new(Ticks(ticks))])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_exit_command_ends_run_and_stops_mappings() {
        let subs = LoopbackSubscriptions::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let fwd = forwarder(subs.clone(), Arc::clone(&ticks));

        let runner = tokio::spawn({
            let fwd = Arc::clone(&fwd);
            async move { fwd.run().await }
        });
        while fwd.scheduler().active().await.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(subs.open_count("pv:a"), 1);

        fwd.commands().submit(r#"{"cmd":"exit"}"#).await.unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(subs.open_count("pv:a"), 0);
        assert_eq!(fwd.scheduler().to_delete().await.len(), 1);
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let fwd = forwarder(LoopbackSubscriptions::new(), Arc::new(AtomicUsize::new(0)));
        fwd.stop();
        fwd.run().await.unwrap();
        assert!(matches!(fwd.run().await, Err(RuntimeError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_failed_listener_task_is_reported() {
        assert!(join_listener(tokio::spawn(async {})).await);
        let failed: JoinHandle<()> = tokio::spawn(async { panic!("listener bug") });
        assert!(!join_listener(failed).await);
    }
}
