use tokio::sync::{mpsc, oneshot};

use super::error::SubmitError;
use super::message::{Command, Reply};
use crate::events::{Event, EventKind};
use crate::mapping::MappingSpec;
use crate::scheduler::Scheduler;

struct Request {
    raw: String,
    reply: Option<oneshot::Sender<Reply>>,
}

/// Creates a bounded command queue.
///
/// The listener is drained by the scheduler once per tick, at most
/// `batch_max` messages at a time.
pub fn channel(capacity: usize, batch_max: usize) -> (CommandHandle, CommandListener) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        CommandHandle { tx },
        CommandListener {
            rx,
            batch_max: batch_max.max(1),
        },
    )
}

/// Handle for submitting raw control messages.
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<Request>,
}

impl CommandHandle {
    /// Submit a message (async, waits if queue is full).
    pub async fn submit(&self, raw: impl Into<String>) -> Result<(), SubmitError> {
        self.tx
            .send(Request {
                raw: raw.into(),
                reply: None,
            })
            .await
            .map_err(|_| SubmitError::Closed)
    }

    /// Try to submit without blocking (fails if queue full).
    pub fn try_submit(&self, raw: impl Into<String>) -> Result<(), SubmitError> {
        self.tx
            .try_send(Request {
                raw: raw.into(),
                reply: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SubmitError::Full,
                mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
            })
    }

    /// Submit a message and wait until the scheduler has applied it.
    pub async fn call(&self, raw: impl Into<String>) -> Result<Reply, SubmitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request {
                raw: raw.into(),
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SubmitError::Closed)?;
        reply_rx.await.map_err(|_| SubmitError::Closed)
    }
}

/// Receiving side of the command queue, polled by the scheduler.
pub struct CommandListener {
    rx: mpsc::Receiver<Request>,
    batch_max: usize,
}

impl CommandListener {
    /// Applies up to `batch_max` queued messages without waiting for more.
    /// Returns how many messages were taken off the queue.
    pub async fn poll(&mut self, scheduler: &Scheduler) -> usize {
        let mut taken = 0;
        while taken < self.batch_max {
            let Ok(req) = self.rx.try_recv() else { break };
            taken += 1;

            let reply = match Command::parse(&req.raw) {
                Ok(cmd) => apply(scheduler, cmd).await,
                Err(err) => {
                    tracing::warn!(error = %err, raw = %req.raw, "command rejected");
                    scheduler.bus().publish(
                        Event::new(EventKind::CommandRejected).with_reason(err.to_string()),
                    );
                    Reply::Rejected(err.to_string())
                }
            };
            if let Some(tx) = req.reply {
                let _ = tx.send(reply);
            }
        }
        taken
    }
}

async fn apply(scheduler: &Scheduler, cmd: Command) -> Reply {
    match cmd {
        Command::Add { channel, topic } => {
            scheduler.mapping_add(MappingSpec::new(channel, topic)).await;
            Reply::Queued
        }
        Command::Remove { topic } => {
            let n = scheduler.mapping_remove_topic(&topic).await;
            tracing::info!(topic = %topic, removed = n, "remove applied");
            Reply::Removed(n)
        }
        Command::List => {
            let specs = scheduler.mapping_list().await;
            for spec in &specs {
                tracing::info!(channel = %spec.channel, topic = %spec.topic, "active mapping");
            }
            Reply::Listed(specs)
        }
        Command::Exit => {
            scheduler.forwarding_exit();
            Reply::Exiting
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::events::Bus;
    use crate::instances::InstanceRegistry;
    use crate::providers::loopback::{LoopbackBroker, LoopbackSubscriptions};
    use crate::scheduler::SchedulerConfig;

    fn scheduler(bus: Bus) -> Scheduler {
        let instances = Arc::new(InstanceRegistry::new(Arc::new(LoopbackBroker::new()), 1));
        let cfg = SchedulerConfig {
            tick_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        Scheduler::new(cfg, Arc::new(LoopbackSubscriptions::new()), instances, bus)
    }

    #[tokio::test]
    async fn test_poll_applies_in_order_and_bounds_batch() {
        let sched = scheduler(Bus::new(64));
        let (handle, mut listener) = channel(16, 2);
        handle
            .try_submit(r#"{"cmd":"add","channel":"a","topic":"T"}"#)
            .unwrap();
        handle
            .try_submit(r#"{"cmd":"add","channel":"b","topic":"T"}"#)
            .unwrap();
        handle
            .try_submit(r#"{"cmd":"add","channel":"c","topic":"T"}"#)
            .unwrap();

        assert_eq!(listener.poll(&sched).await, 2);
        assert_eq!(
            sched.pending().await,
            vec![MappingSpec::new("a", "T"), MappingSpec::new("b", "T")]
        );
        assert_eq!(listener.poll(&sched).await, 1);
        assert_eq!(listener.poll(&sched).await, 0);
    }

    #[tokio::test]
    async fn test_rejected_message_is_reported_and_skipped() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let sched = scheduler(bus);
        let (handle, mut listener) = channel(16, 8);
        handle.submit("{oops").await.unwrap();
        handle.submit(r#"{"cmd":"exit"}"#).await.unwrap();

        assert_eq!(listener.poll(&sched).await, 2);
        assert!(sched.exit_requested());

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|ev| ev.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::CommandRejected, EventKind::ExitRequested]
        );
    }

    #[tokio::test]
    async fn test_call_returns_reply_after_poll() {
        let sched = scheduler(Bus::new(64));
        let (handle, mut listener) = channel(16, 8);

        let caller = tokio::spawn({
            let handle = handle.clone();
            async move { handle.call(r#"{"cmd":"list"}"#).await }
        });
        while listener.poll(&sched).await == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(caller.await.unwrap(), Ok(Reply::Listed(Vec::new())));
    }

    #[tokio::test]
    async fn test_full_and_closed_queue() {
        let (handle, listener) = channel(1, 1);
        handle.try_submit("{}").unwrap();
        assert_eq!(handle.try_submit("{}"), Err(SubmitError::Full));
        drop(listener);
        assert_eq!(handle.submit("{}").await, Err(SubmitError::Closed));
    }
}
