//! # In-memory providers.
//!
//! [`LoopbackSubscriptions`] and [`LoopbackBroker`] implement the external
//! contracts without any network. Values are injected with
//! [`LoopbackSubscriptions::post`] and delivered synchronously on the caller's
//! thread, which stands in for the provider's callback thread. Published
//! messages are recorded per topic.
//!
//! Both types are cheap to clone; clones share state, so a test can keep one
//! handle while the forwarder owns another.
//!
//! ## Fault injection
//! - [`LoopbackSubscriptions::set_unavailable`]: `open` fails for a channel.
//! - [`LoopbackSubscriptions::fail`]: delivers `on_error` to every open sink.
//! - [`LoopbackBroker::reject_topic`]: `open_target` fails for a topic.
//! - [`LoopbackBroker::inject_publish_fault`]: `publish` returns the given error.
//! - [`LoopbackBroker::poison_client`]: a client reports a fatal error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{
    BrokerClient, BrokerConnector, PublishTarget, Subscription, SubscriptionProvider, UpdateSink,
};
use crate::error::{AcquireError, PublishError};

struct SinkEntry {
    sink: Arc<dyn UpdateSink>,
    closed: AtomicBool,
}

#[derive(Default)]
struct SubscriptionsInner {
    channels: Mutex<HashMap<String, Vec<Arc<SinkEntry>>>>,
    unavailable: Mutex<HashSet<String>>,
    opened: AtomicUsize,
}

impl SubscriptionsInner {
    /// Open sinks of a channel; collected under the lock, invoked outside it.
    fn sinks(&self, channel: &str) -> Vec<Arc<SinkEntry>> {
        self.channels
            .lock()
            .get(channel)
            .map(|v| v.iter().filter(|e| !e.closed.load(Ordering::Acquire)).cloned().collect())
            .unwrap_or_default()
    }
}

/// In-memory [`SubscriptionProvider`].
#[derive(Clone)]
pub struct LoopbackSubscriptions {
    inner: Arc<SubscriptionsInner>,
    auto_connect: bool,
}

impl Default for LoopbackSubscriptions {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackSubscriptions {
    /// Creates a provider that reports `on_connected` as soon as a channel is opened.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionsInner::default()),
            auto_connect: true,
        }
    }

    /// Controls whether `open` immediately reports `on_connected`.
    ///
    /// With `false`, mappings stay in `Init` until [`connect`](Self::connect)
    /// or a successful publish.
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Makes `open` fail (or succeed again) for `channel`.
    pub fn set_unavailable(&self, channel: &str, unavailable: bool) {
        let mut set = self.inner.unavailable.lock();
        if unavailable {
            set.insert(channel.to_string());
        } else {
            set.remove(channel);
        }
    }

    /// Delivers a value to every open subscription of `channel`. Returns the number of sinks reached.
    pub fn post(&self, channel: &str, payload: &[u8]) -> usize {
        let sinks = self.inner.sinks(channel);
        for entry in &sinks {
            entry.sink.on_value(payload);
        }
        sinks.len()
    }

    /// Delivers a value to every open subscription of every channel.
    pub fn post_all(&self, payload: &[u8]) -> usize {
        self.channels()
            .iter()
            .map(|channel| self.post(channel, payload))
            .sum()
    }

    /// Reports `on_connected` to every open subscription of `channel`.
    pub fn connect(&self, channel: &str) -> usize {
        let sinks = self.inner.sinks(channel);
        for entry in &sinks {
            entry.sink.on_connected();
        }
        sinks.len()
    }

    /// Reports `on_error` to every open subscription of `channel`.
    pub fn fail(&self, channel: &str, reason: &str) -> usize {
        let sinks = self.inner.sinks(channel);
        for entry in &sinks {
            entry.sink.on_error(reason);
        }
        sinks.len()
    }

    /// Number of subscriptions of `channel` that are open (not closed).
    pub fn open_count(&self, channel: &str) -> usize {
        self.inner.sinks(channel).len()
    }

    /// Total number of successful `open` calls so far.
    pub fn opened_total(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Sorted names of channels with at least one open subscription.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .channels
            .lock()
            .iter()
            .filter(|(_, v)| v.iter().any(|e| !e.closed.load(Ordering::Acquire)))
            .map(|(k, _)| k.clone())
            .collect();
        names.sort_unstable();
        names
    }
}

impl SubscriptionProvider for LoopbackSubscriptions {
    fn open(
        &self,
        channel: &str,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<Box<dyn Subscription>, AcquireError> {
        if self.inner.unavailable.lock().contains(channel) {
            return Err(AcquireError::Subscription {
                channel: channel.to_string(),
                reason: "channel unavailable".into(),
            });
        }

        let entry = Arc::new(SinkEntry {
            sink: Arc::clone(&sink),
            closed: AtomicBool::new(false),
        });
        {
            let mut channels = self.inner.channels.lock();
            let list = channels.entry(channel.to_string()).or_default();
            list.retain(|e| !e.closed.load(Ordering::Acquire));
            list.push(Arc::clone(&entry));
        }
        self.inner.opened.fetch_add(1, Ordering::Relaxed);

        if self.auto_connect {
            sink.on_connected();
        }
        Ok(Box::new(LoopbackSubscription { entry }))
    }
}

struct LoopbackSubscription {
    entry: Arc<SinkEntry>,
}

impl Subscription for LoopbackSubscription {
    fn close(&self) {
        self.entry.closed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct BrokerInner {
    messages: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    rejected_topics: Mutex<HashSet<String>>,
    publish_faults: Mutex<HashMap<String, PublishError>>,
    clients: Mutex<Vec<Arc<LoopbackClient>>>,
    refuse_connect: AtomicBool,
    health_checks: AtomicUsize,
}

/// In-memory [`BrokerConnector`] recording every published message.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<BrokerInner>,
}

impl LoopbackBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open_target` fail (or succeed again) for `topic`.
    pub fn reject_topic(&self, topic: &str, rejected: bool) {
        let mut set = self.inner.rejected_topics.lock();
        if rejected {
            set.insert(topic.to_string());
        } else {
            set.remove(topic);
        }
    }

    /// Every publish to `topic` returns `err` until cleared.
    pub fn inject_publish_fault(&self, topic: &str, err: PublishError) {
        self.inner
            .publish_faults
            .lock()
            .insert(topic.to_string(), err);
    }

    /// Removes a fault installed by [`inject_publish_fault`](Self::inject_publish_fault).
    pub fn clear_publish_fault(&self, topic: &str) {
        self.inner.publish_faults.lock().remove(topic);
    }

    /// Makes `connect` fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connect.store(refuse, Ordering::Release);
    }

    /// Flags client `instance_id` as fatally broken. Returns false if unknown.
    pub fn poison_client(&self, instance_id: u64) -> bool {
        let clients = self.inner.clients.lock();
        match clients.iter().find(|c| c.id == instance_id) {
            Some(client) => {
                client.fatal.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Messages published to `topic`, oldest first.
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .messages
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages published to `topic`.
    pub fn message_count(&self, topic: &str) -> usize {
        self.inner
            .messages
            .lock()
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Number of clients connected so far.
    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Number of `check_topic_health` calls across all clients.
    pub fn health_checks(&self) -> usize {
        self.inner.health_checks.load(Ordering::Relaxed)
    }
}

impl BrokerConnector for LoopbackBroker {
    fn connect(&self, instance_id: u64) -> Result<Arc<dyn BrokerClient>, AcquireError> {
        if self.inner.refuse_connect.load(Ordering::Acquire) {
            return Err(AcquireError::NoInstance {
                reason: "broker refused connection".into(),
            });
        }
        let client = Arc::new(LoopbackClient {
            id: instance_id,
            broker: Arc::clone(&self.inner),
            fatal: AtomicBool::new(false),
        });
        self.inner.clients.lock().push(Arc::clone(&client));
        Ok(client)
    }
}

struct LoopbackClient {
    id: u64,
    broker: Arc<BrokerInner>,
    fatal: AtomicBool,
}

impl BrokerClient for LoopbackClient {
    fn open_target(&self, topic: &str) -> Result<Arc<dyn PublishTarget>, AcquireError> {
        if self.broker.rejected_topics.lock().contains(topic) {
            return Err(AcquireError::Target {
                topic: topic.to_string(),
                reason: "topic rejected by broker".into(),
            });
        }
        Ok(Arc::new(LoopbackTarget {
            topic: topic.to_string(),
            broker: Arc::clone(&self.broker),
        }))
    }

    fn check_topic_health(&self) {
        self.broker.health_checks.fetch_add(1, Ordering::Relaxed);
    }

    fn has_fatal_error(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }
}

struct LoopbackTarget {
    topic: String,
    broker: Arc<BrokerInner>,
}

impl PublishTarget for LoopbackTarget {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, payload: &[u8]) -> Result<(), PublishError> {
        if let Some(err) = self.broker.publish_faults.lock().get(&self.topic) {
            return Err(err.clone());
        }
        self.broker
            .messages
            .lock()
            .entry(self.topic.clone())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        connected: AtomicUsize,
        values: AtomicUsize,
        errors: AtomicUsize,
    }

    impl UpdateSink for Recorder {
        fn on_connected(&self) {
            self.connected.fetch_add(1, Ordering::Relaxed);
        }
        fn on_value(&self, _payload: &[u8]) {
            self.values.fetch_add(1, Ordering::Relaxed);
        }
        fn on_error(&self, _reason: &str) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_closed_subscription_stops_receiving() {
        let subs = LoopbackSubscriptions::new();
        let rec = Arc::new(Recorder::default());
        let handle = subs.open("pv:a", rec.clone()).unwrap();
        assert_eq!(rec.connected.load(Ordering::Relaxed), 1);

        assert_eq!(subs.post("pv:a", b"1"), 1);
        handle.close();
        assert_eq!(subs.post("pv:a", b"2"), 0);
        assert_eq!(rec.values.load(Ordering::Relaxed), 1);
        assert!(subs.channels().is_empty());
    }

    #[test]
    fn test_unavailable_channel_refuses_open() {
        let subs = LoopbackSubscriptions::new();
        subs.set_unavailable("pv:a", true);
        let err = subs
            .open("pv:a", Arc::new(Recorder::default()))
            .err()
            .unwrap();
        assert_eq!(err.as_label(), "acquire_subscription");
    }

    #[test]
    fn test_broker_records_and_faults() {
        let broker = LoopbackBroker::new();
        let client = broker.connect(0).unwrap();
        let target = client.open_target("T").unwrap();
        target.publish(b"x").unwrap();
        assert_eq!(broker.messages("T"), vec![b"x".to_vec()]);

        broker.inject_publish_fault("T", PublishError::Fatal { reason: "gone".into() });
        assert!(target.publish(b"y").unwrap_err().is_fatal());
        assert_eq!(broker.message_count("T"), 1);

        assert!(!client.has_fatal_error());
        assert!(broker.poison_client(0));
        assert!(client.has_fatal_error());
    }
}
