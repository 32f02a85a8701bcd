use std::sync::Arc;

use super::{config::Config, forwarder::Forwarder};
use crate::command;
use crate::error::ConfigError;
use crate::events::Bus;
use crate::instances::InstanceRegistry;
use crate::providers::{BrokerConnector, SubscriptionProvider};
use crate::scheduler::Scheduler;
use crate::subscribers::Subscribe;

/// Builder for a [`Forwarder`].
pub struct ForwarderBuilder {
    cfg: Config,
    subscriptions: Arc<dyn SubscriptionProvider>,
    connector: Arc<dyn BrokerConnector>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ForwarderBuilder {
    /// Creates a builder from a configuration and the two external providers.
    pub fn new(
        cfg: Config,
        subscriptions: Arc<dyn SubscriptionProvider>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            cfg,
            subscriptions,
            connector,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and assembles the runtime.
    ///
    /// Nothing is spawned until [`Forwarder::run`].
    pub fn build(self) -> Result<Arc<Forwarder>, ConfigError> {
        self.cfg.validate()?;

        let bus = Bus::new(self.cfg.bus_capacity);
        let instances = Arc::new(InstanceRegistry::new(
            self.connector,
            self.cfg.max_instances,
        ));
        let scheduler = Arc::new(Scheduler::new(
            self.cfg.scheduler(),
            self.subscriptions,
            instances,
            bus.clone(),
        ));
        let (commands, listener) =
            command::channel(self.cfg.command_queue_capacity, self.cfg.command_batch_max);

        Ok(Arc::new(Forwarder::new_internal(
            self.cfg,
            bus,
            scheduler,
            commands,
            listener,
            self.subscribers,
        )))
    }
}
