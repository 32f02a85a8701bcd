//! # External collaborators.
//!
//! The forwarder never talks to the instrument-control network or to the
//! broker directly. It consumes both through the narrow contracts below:
//!
//! ```text
//!   SubscriptionProvider::open(channel, sink) ──► Box<dyn Subscription>
//!          │
//!          └─ calls back on its own threads:
//!               sink.on_connected() / sink.on_value(payload) / sink.on_error(reason)
//!
//!   BrokerConnector::connect(id) ──► Arc<dyn BrokerClient>
//!          BrokerClient::open_target(topic) ──► Arc<dyn PublishTarget>
//!          PublishTarget::publish(payload)  ──► Ok | Transient | Fatal
//! ```
//!
//! Callback traits are synchronous: they run on threads the forwarder does not
//! control and must never block on the scheduler.
//!
//! [`loopback`] provides in-memory implementations of every contract.

pub mod loopback;

use std::sync::Arc;

use crate::error::{AcquireError, PublishError};

/// Receives value updates and errors for one open subscription.
///
/// Implemented by the forwarder; invoked by the provider from any thread,
/// possibly after [`Subscription::close`] was requested.
pub trait UpdateSink: Send + Sync + 'static {
    /// The subscription is live (the source is connected).
    fn on_connected(&self);

    /// A new value arrived.
    fn on_value(&self, payload: &[u8]);

    /// The subscription hit an error it cannot recover from.
    fn on_error(&self, reason: &str);
}

/// Handle to one open subscription.
pub trait Subscription: Send + Sync {
    /// Requests the subscription to stop. Fire-and-forget: trailing callbacks
    /// may still be delivered to the sink afterwards.
    fn close(&self);
}

/// Opens subscriptions on named channels (process variables).
pub trait SubscriptionProvider: Send + Sync + 'static {
    /// Opens a subscription for `channel`, delivering updates into `sink`.
    fn open(
        &self,
        channel: &str,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<Box<dyn Subscription>, AcquireError>;
}

/// Publish handle for one topic.
pub trait PublishTarget: Send + Sync {
    /// Topic this handle writes to.
    fn topic(&self) -> &str;

    /// Publishes one message.
    fn publish(&self, payload: &[u8]) -> Result<(), PublishError>;
}

/// One broker-client connection.
pub trait BrokerClient: Send + Sync {
    /// Opens a publish target for `topic`.
    fn open_target(&self, topic: &str) -> Result<Arc<dyn PublishTarget>, AcquireError>;

    /// Gives the client a chance to verify its topics. Problems surface through
    /// the targets themselves (failed publishes) or through [`has_fatal_error`](Self::has_fatal_error).
    fn check_topic_health(&self);

    /// True once the client is unusable as a whole.
    fn has_fatal_error(&self) -> bool;
}

/// Creates broker-client instances on demand.
pub trait BrokerConnector: Send + Sync + 'static {
    /// Connects a new client; `instance_id` is the registry id it will carry.
    fn connect(&self, instance_id: u64) -> Result<Arc<dyn BrokerClient>, AcquireError>;
}
