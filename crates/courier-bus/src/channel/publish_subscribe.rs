//! Publish-subscribe channel: every current subscriber receives each envelope.

use super::{track, ChannelKind, ChannelMetrics, ChannelStats, MessageChannel, SubscribableChannel};
use crate::config::PublishSubscribeConfig;
use crate::dispatcher::BroadcastDispatcher;
use crate::error::ChannelError;
use crate::error_handler::{DeliveryErrorEvent, SharedErrorHandler};
use crate::pool::WorkerPool;
use crate::subscribers::{SubscriberRegistry, SubscriptionId};
use async_trait::async_trait;
use courier_types::{Envelope, MessageConsumer};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct PublishSubscribeChannel {
    name: String,
    config: PublishSubscribeConfig,
    subscribers: SubscriberRegistry,
    dispatcher: BroadcastDispatcher,
    error_handler: SharedErrorHandler,
    metrics: ChannelMetrics,
}

impl PublishSubscribeChannel {
    /// With `pool`, each delivery runs as an independent job.
    pub fn new(
        name: impl Into<String>,
        config: PublishSubscribeConfig,
        pool: Option<Arc<WorkerPool>>,
        error_handler: SharedErrorHandler,
    ) -> Self {
        let name = name.into();
        Self {
            dispatcher: BroadcastDispatcher::new(
                name.clone(),
                config.apply_sequence,
                pool,
                Arc::clone(&error_handler),
            ),
            name,
            config,
            subscribers: SubscriberRegistry::new(),
            error_handler,
            metrics: ChannelMetrics::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> PublishSubscribeConfig {
        self.config
    }

    async fn send_inner(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let envelope = track(envelope, self.config.track_history, &self.name);
        let snapshot = self.subscribers.snapshot();
        if snapshot.len() < self.config.min_subscribers {
            return Err(ChannelError::NoSubscriber {
                channel: self.name.clone(),
            });
        }

        let outcome = self.dispatcher.dispatch(&snapshot, &envelope).await;
        let mut failures = outcome.failures.into_iter();

        let first = if self.config.ignore_failures {
            None
        } else {
            failures.next()
        };
        for failure in failures {
            self.error_handler
                .handle_error(DeliveryErrorEvent::new(
                    self.name.clone(),
                    Some(envelope.clone()),
                    failure,
                ))
                .await;
        }

        match first {
            Some(failure) => Err(failure),
            None => {
                debug!(
                    channel = %self.name,
                    message_id = %envelope.id(),
                    delivered = outcome.delivered,
                    "Message published"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageChannel for PublishSubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::PublishSubscribe
    }

    /// Delivers to all subscribers; the timeout is unused.
    async fn send(&self, envelope: Envelope, _timeout: Option<Duration>) -> Result<(), ChannelError> {
        let result = self.send_inner(envelope).await;
        self.metrics.record_send(&result);
        result
    }

    fn stats(&self) -> ChannelStats {
        self.metrics.snapshot()
    }
}

impl SubscribableChannel for PublishSubscribeChannel {
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

impl std::fmt::Debug for PublishSubscribeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishSubscribeChannel")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("subscribers", &self.subscribers.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
