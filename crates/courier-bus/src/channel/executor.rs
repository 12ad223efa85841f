//! Executor channel: point-to-point dispatch handed off to a worker pool.
//!
//! `send` returns once the dispatch job is accepted by the pool. Saturation
//! follows the pool's [`RejectionPolicy`](crate::pool::RejectionPolicy).

use super::{track, ChannelKind, ChannelMetrics, ChannelStats, MessageChannel, SubscribableChannel};
use crate::config::DispatcherConfig;
use crate::dispatcher::UnicastDispatcher;
use crate::error::ChannelError;
use crate::error_handler::{DeliveryErrorEvent, SharedErrorHandler};
use crate::pool::WorkerPool;
use crate::subscribers::{SubscriberRegistry, SubscriptionId};
use async_trait::async_trait;
use courier_types::{Envelope, MessageConsumer};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ExecutorChannel {
    name: String,
    subscribers: Arc<SubscriberRegistry>,
    dispatcher: Arc<UnicastDispatcher>,
    pool: Arc<WorkerPool>,
    error_handler: SharedErrorHandler,
    track_history: bool,
    metrics: ChannelMetrics,
}

impl ExecutorChannel {
    pub fn new(
        name: impl Into<String>,
        pool: Arc<WorkerPool>,
        config: DispatcherConfig,
        error_handler: SharedErrorHandler,
        track_history: bool,
    ) -> Self {
        let name = name.into();
        Self {
            dispatcher: Arc::new(UnicastDispatcher::new(name.clone(), config)),
            name,
            subscribers: Arc::new(SubscriberRegistry::new()),
            pool,
            error_handler,
            track_history,
            metrics: ChannelMetrics::default(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    async fn send_inner(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        if self.subscribers.is_empty() {
            return Err(ChannelError::NoSubscriber {
                channel: self.name.clone(),
            });
        }
        let envelope = track(envelope, self.track_history, &self.name);
        let message_id = envelope.id();

        let name = self.name.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let dispatcher = Arc::clone(&self.dispatcher);
        let error_handler = Arc::clone(&self.error_handler);
        let job = async move {
            // Subscribers as of execution, not submission.
            let snapshot = subscribers.snapshot();
            if let Err(e) = dispatcher.dispatch(&snapshot, &envelope).await {
                error_handler
                    .handle_error(DeliveryErrorEvent::new(name, Some(envelope), e))
                    .await;
            }
        }
        .boxed();

        self.pool.submit(job, timeout).await?;
        debug!(channel = %self.name, message_id = %message_id, pool = self.pool.name(), "Dispatch submitted");
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for ExecutorChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Executor
    }

    /// `timeout` bounds the wait for pool space under a blocking policy.
    async fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let result = self.send_inner(envelope, timeout).await;
        self.metrics.record_send(&result);
        result
    }

    fn stats(&self) -> ChannelStats {
        self.metrics.snapshot()
    }
}

impl SubscribableChannel for ExecutorChannel {
    fn subscribe(&self, consumer: Arc<dyn MessageConsumer>) -> SubscriptionId {
        self.subscribers.subscribe(consumer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for ExecutorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorChannel")
            .field("name", &self.name)
            .field("pool", &self.pool)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
