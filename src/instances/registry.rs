use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::AcquireError;
use crate::providers::{BrokerClient, BrokerConnector};

/// One broker-client connection tracked by the registry.
///
/// Mappings keep a `Weak<Instance>`; the registry holds the only strong
/// reference, so retiring an instance is observable by its dependants.
pub struct Instance {
    id: u64,
    client: Arc<dyn BrokerClient>,
    fatal: AtomicBool,
}

impl Instance {
    /// Registry id (monotonic, never reused).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Underlying broker client.
    pub fn client(&self) -> &Arc<dyn BrokerClient> {
        &self.client
    }

    /// True once the instance or its client reported a fatal error.
    pub fn has_fatal_error(&self) -> bool {
        self.fatal.load(Ordering::Acquire) || self.client.has_fatal_error()
    }

    /// Flags the instance as unusable. Safe from any thread.
    pub fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    /// Delegates to [`BrokerClient::check_topic_health`].
    pub fn check_topic_health(&self) {
        self.client.check_topic_health();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("fatal", &self.has_fatal_error())
            .finish()
    }
}

/// Set of broker-client instances.
///
/// Instances are connected lazily until `max_instances` exist; after that
/// healthy instances are handed out round-robin.
pub struct InstanceRegistry {
    connector: Arc<dyn BrokerConnector>,
    instances: Mutex<Vec<Arc<Instance>>>,
    max_instances: usize,
    next_id: AtomicU64,
    cursor: AtomicUsize,
}

impl InstanceRegistry {
    /// Creates an empty registry. `max_instances` is clamped to at least 1.
    pub fn new(connector: Arc<dyn BrokerConnector>, max_instances: usize) -> Self {
        Self {
            connector,
            instances: Mutex::new(Vec::new()),
            max_instances: max_instances.max(1),
            next_id: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns an instance for a new mapping, connecting one if the pool is not full.
    pub fn acquire(&self) -> Result<Arc<Instance>, AcquireError> {
        let mut instances = self.instances.lock();

        if instances.len() < self.max_instances {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match self.connector.connect(id) {
                Ok(client) => {
                    let instance = Arc::new(Instance {
                        id,
                        client,
                        fatal: AtomicBool::new(false),
                    });
                    instances.push(Arc::clone(&instance));
                    tracing::info!(instance = id, "broker instance connected");
                    return Ok(instance);
                }
                // Fall back to the existing pool, if any.
                Err(err) if instances.is_empty() => return Err(err),
                Err(err) => {
                    tracing::warn!(instance = id, error = %err, "broker connect failed");
                }
            }
        }

        let n = instances.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..n)
            .map(|i| &instances[(start + i) % n])
            .find(|inst| !inst.has_fatal_error())
            .cloned()
            .ok_or_else(|| AcquireError::NoInstance {
                reason: "all broker instances are unusable".into(),
            })
    }

    /// Snapshot of the current instances (cheap `Arc` clones).
    pub fn snapshot(&self) -> Vec<Arc<Instance>> {
        self.instances.lock().clone()
    }

    /// Removes an instance. Dependent mappings are not touched; they notice
    /// on their next self-check.
    pub fn retire(&self, id: u64) -> Option<Arc<Instance>> {
        let mut instances = self.instances.lock();
        let pos = instances.iter().position(|i| i.id == id)?;
        Some(instances.remove(pos))
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    /// True if no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}
