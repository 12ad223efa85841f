//! # Channel Builders
//!
//! Fluent construction of fully formed channels:
//!
//! ```ignore
//! let orders = Channels::queue("orders").capacity(100).build()?;
//! let events = Channels::publish_subscribe("events").apply_sequence(true).build()?;
//! let work = Channels::executor("work", pool).failover(false).build()?;
//! ```

use crate::channel::{
    Channel, ChannelKind, DirectChannel, ExecutorChannel, PublishSubscribeChannel, QueueChannel,
    RendezvousChannel,
};
use crate::config::{DispatcherConfig, MessagingDefaults, PublishSubscribeConfig, QueueConfig};
use crate::dispatcher::LoadBalancing;
use crate::error::ConfigError;
use crate::error_handler::{default_error_handler, SharedErrorHandler};
use crate::pool::WorkerPool;
use courier_store::{InMemoryMessageStore, MessageStore};
use std::sync::Arc;

/// Entry point for channel construction.
pub struct Channels;

impl Channels {
    pub fn direct(name: impl Into<String>) -> DirectSpec {
        DirectSpec {
            name: name.into(),
            dispatcher: DispatcherConfig::default(),
            track_history: false,
        }
    }

    pub fn queue(name: impl Into<String>) -> QueueSpec {
        QueueSpec::new(name.into(), ChannelKind::Queue)
    }

    pub fn priority(name: impl Into<String>) -> QueueSpec {
        QueueSpec::new(name.into(), ChannelKind::Priority)
    }

    pub fn rendezvous(name: impl Into<String>) -> RendezvousSpec {
        RendezvousSpec { name: name.into() }
    }

    pub fn publish_subscribe(name: impl Into<String>) -> PublishSubscribeSpec {
        PublishSubscribeSpec {
            name: name.into(),
            config: PublishSubscribeConfig::default(),
            pool: None,
            error_handler: None,
        }
    }

    pub fn executor(name: impl Into<String>, pool: Arc<WorkerPool>) -> ExecutorSpec {
        ExecutorSpec {
            name: name.into(),
            pool,
            dispatcher: DispatcherConfig::default(),
            error_handler: None,
            track_history: false,
        }
    }
}

fn require_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    Ok(())
}

// =============================================================================
// DIRECT
// =============================================================================

#[derive(Debug, Clone)]
pub struct DirectSpec {
    name: String,
    dispatcher: DispatcherConfig,
    track_history: bool,
}

impl DirectSpec {
    #[must_use]
    pub fn load_balancing(mut self, load_balancing: LoadBalancing) -> Self {
        self.dispatcher.load_balancing = load_balancing;
        self
    }

    #[must_use]
    pub fn failover(mut self, failover: bool) -> Self {
        self.dispatcher.failover = failover;
        self
    }

    #[must_use]
    pub fn track_history(mut self, enabled: bool) -> Self {
        self.track_history = enabled;
        self
    }

    pub fn build_direct(self) -> Result<Arc<DirectChannel>, ConfigError> {
        require_name(&self.name)?;
        Ok(Arc::new(DirectChannel::new(
            self.name,
            self.dispatcher,
            self.track_history,
        )))
    }

    pub fn build(self) -> Result<Channel, ConfigError> {
        self.build_direct().map(Channel::Direct)
    }
}

// =============================================================================
// QUEUE / PRIORITY
// =============================================================================

pub struct QueueSpec {
    name: String,
    kind: ChannelKind,
    config: QueueConfig,
    store: Option<Arc<dyn MessageStore>>,
}

impl QueueSpec {
    fn new(name: String, kind: ChannelKind) -> Self {
        Self {
            name,
            kind,
            config: QueueConfig::default(),
            store: None,
        }
    }

    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    /// Takes the capacity from process-wide defaults.
    #[must_use]
    pub fn defaults(mut self, defaults: &MessagingDefaults) -> Self {
        self.config.capacity = defaults.queue_config().capacity;
        self
    }

    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.config.capacity = None;
        self
    }

    /// Backs the channel with a shared store instead of a private one.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Store group; defaults to the channel name.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn track_history(mut self, enabled: bool) -> Self {
        self.config.track_history = enabled;
        self
    }

    #[must_use]
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build_queue(self) -> Result<Arc<QueueChannel>, ConfigError> {
        let store: Arc<dyn MessageStore> = match self.store {
            Some(store) => store,
            None if self.kind == ChannelKind::Priority => Arc::new(InMemoryMessageStore::priority()),
            None => Arc::new(InMemoryMessageStore::fifo()),
        };
        QueueChannel::with_store(self.name, self.kind, store, self.config).map(Arc::new)
    }

    pub fn build(self) -> Result<Channel, ConfigError> {
        self.build_queue().map(Channel::from)
    }
}

// =============================================================================
// RENDEZVOUS
// =============================================================================

#[derive(Debug, Clone)]
pub struct RendezvousSpec {
    name: String,
}

impl RendezvousSpec {
    pub fn build_rendezvous(self) -> Result<Arc<RendezvousChannel>, ConfigError> {
        require_name(&self.name)?;
        Ok(Arc::new(RendezvousChannel::new(self.name)))
    }

    pub fn build(self) -> Result<Channel, ConfigError> {
        self.build_rendezvous().map(Channel::Rendezvous)
    }
}

// =============================================================================
// PUBLISH-SUBSCRIBE
// =============================================================================

pub struct PublishSubscribeSpec {
    name: String,
    config: PublishSubscribeConfig,
    pool: Option<Arc<WorkerPool>>,
    error_handler: Option<SharedErrorHandler>,
}

impl PublishSubscribeSpec {
    #[must_use]
    pub fn min_subscribers(mut self, min: usize) -> Self {
        self.config.min_subscribers = min;
        self
    }

    #[must_use]
    pub fn ignore_failures(mut self, ignore: bool) -> Self {
        self.config.ignore_failures = ignore;
        self
    }

    #[must_use]
    pub fn apply_sequence(mut self, apply: bool) -> Self {
        self.config.apply_sequence = apply;
        self
    }

    #[must_use]
    pub fn track_history(mut self, enabled: bool) -> Self {
        self.config.track_history = enabled;
        self
    }

    /// Delivers to each subscriber as an independent job on `pool`.
    #[must_use]
    pub fn executor(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: SharedErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn build_publish_subscribe(self) -> Result<Arc<PublishSubscribeChannel>, ConfigError> {
        require_name(&self.name)?;
        if let Some(pool) = &self.pool {
            if pool.is_shutdown() {
                return Err(ConfigError::InvalidPool {
                    pool: pool.name().to_string(),
                    detail: "pool is shut down".to_string(),
                });
            }
        }
        Ok(Arc::new(PublishSubscribeChannel::new(
            self.name,
            self.config,
            self.pool,
            self.error_handler.unwrap_or_else(default_error_handler),
        )))
    }

    pub fn build(self) -> Result<Channel, ConfigError> {
        self.build_publish_subscribe().map(Channel::PublishSubscribe)
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

pub struct ExecutorSpec {
    name: String,
    pool: Arc<WorkerPool>,
    dispatcher: DispatcherConfig,
    error_handler: Option<SharedErrorHandler>,
    track_history: bool,
}

impl ExecutorSpec {
    #[must_use]
    pub fn load_balancing(mut self, load_balancing: LoadBalancing) -> Self {
        self.dispatcher.load_balancing = load_balancing;
        self
    }

    #[must_use]
    pub fn failover(mut self, failover: bool) -> Self {
        self.dispatcher.failover = failover;
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: SharedErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn track_history(mut self, enabled: bool) -> Self {
        self.track_history = enabled;
        self
    }

    pub fn build_executor(self) -> Result<Arc<ExecutorChannel>, ConfigError> {
        require_name(&self.name)?;
        if self.pool.is_shutdown() {
            return Err(ConfigError::InvalidPool {
                pool: self.pool.name().to_string(),
                detail: "pool is shut down".to_string(),
            });
        }
        Ok(Arc::new(ExecutorChannel::new(
            self.name,
            self.pool,
            self.dispatcher,
            self.error_handler.unwrap_or_else(default_error_handler),
            self.track_history,
        )))
    }

    pub fn build(self) -> Result<Channel, ConfigError> {
        self.build_executor().map(Channel::Executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{RejectionPolicy, WorkerPoolConfig};
    use courier_store::StoreOrdering;

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(Channels::direct("").build().unwrap_err(), ConfigError::EmptyName);
        assert_eq!(Channels::queue("").build().unwrap_err(), ConfigError::EmptyName);
        assert_eq!(
            Channels::rendezvous("").build().unwrap_err(),
            ConfigError::EmptyName
        );
    }

    #[test]
    fn test_queue_options() {
        let q = Channels::queue("orders")
            .capacity(7)
            .group("orders-v2")
            .build_queue()
            .unwrap();
        assert_eq!(q.capacity(), Some(7));
        assert_eq!(q.group(), "orders-v2");

        let unbounded = Channels::queue("all").unbounded().build_queue().unwrap();
        assert_eq!(unbounded.capacity(), None);

        assert!(matches!(
            Channels::queue("bad").capacity(0).build(),
            Err(ConfigError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_queue_capacity_from_defaults() {
        let defaults = MessagingDefaults {
            queue_capacity: Some(12),
            ..MessagingDefaults::default()
        };
        let q = Channels::queue("orders").defaults(&defaults).build_queue().unwrap();
        assert_eq!(q.capacity(), Some(12));

        let unbounded = MessagingDefaults {
            queue_capacity: None,
            ..MessagingDefaults::default()
        };
        let q = Channels::priority("ranked").defaults(&unbounded).build_queue().unwrap();
        assert_eq!(q.capacity(), None);
    }

    #[tokio::test]
    async fn test_pool_sized_from_defaults() {
        let defaults = MessagingDefaults {
            workers: 2,
            worker_queue: 8,
            ..MessagingDefaults::default()
        };
        let pool = WorkerPool::with_defaults("exec", &defaults, RejectionPolicy::Abort).unwrap();
        let debug = format!("{pool:?}");
        assert!(debug.contains("workers: 2"));
        assert!(debug.contains("queue_capacity: 8"));
        assert_eq!(pool.policy(), RejectionPolicy::Abort);
        pool.shutdown().await;
    }

    #[test]
    fn test_priority_uses_priority_store() {
        let p = Channels::priority("p").build_queue().unwrap();
        assert_eq!(p.store().ordering(), StoreOrdering::Priority);

        let err = Channels::priority("p")
            .store(Arc::new(InMemoryMessageStore::fifo()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::StoreOrderingMismatch { .. }));
    }

    #[tokio::test]
    async fn test_executor_requires_live_pool() {
        let pool = WorkerPool::start(WorkerPoolConfig {
            name: "p".into(),
            workers: 1,
            queue_capacity: 1,
            rejection: RejectionPolicy::Abort,
        })
        .unwrap();
        assert_eq!(
            Channels::executor("e", Arc::clone(&pool)).build().unwrap().kind(),
            ChannelKind::Executor
        );

        pool.shutdown().await;
        assert!(matches!(
            Channels::executor("e", Arc::clone(&pool)).build(),
            Err(ConfigError::InvalidPool { .. })
        ));
        assert!(matches!(
            Channels::publish_subscribe("ps").executor(pool).build(),
            Err(ConfigError::InvalidPool { .. })
        ));
    }
}
