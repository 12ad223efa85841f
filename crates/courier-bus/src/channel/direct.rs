//! Direct channel: synchronous point-to-point hand-off in the sender's task.

use super::{track, ChannelKind, ChannelMetrics, ChannelStats, MessageChannel, SubscribableChannel};
use crate::config::DispatcherConfig;
use crate::dispatcher::UnicastDispatcher;
use crate::error::ChannelError;
use crate::subscribers::{SubscriberRegistry, SubscriptionId};
use async_trait::async_trait;
use courier_types::{Envelope, MessageConsumer};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct DirectChannel {
    name: String,
    subscribers: SubscriberRegistry,
    dispatcher: UnicastDispatcher,
    track_history: bool,
    metrics: ChannelMetrics,
}

impl DirectChannel {
    pub fn new(name: impl Into<String>, config: DispatcherConfig, track_history: bool) -> Self {
        let name = name.into();
        Self {
            dispatcher: UnicastDispatcher::new(name.clone(), config),
            name,
            subscribers: SubscriberRegistry::new(),
            track_history,
            metrics: ChannelMetrics::default(),
        }
    }
}

#[async_trait]
impl MessageChannel for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Direct
    }

    /// Invokes one subscriber before returning. The timeout is unused: the
    /// call lasts as long as the subscriber does.
    async fn send(&self, envelope: Envelope, _timeout: Option<Duration>) -> Result<(), ChannelError> {
        let envelope = track(envelope, self.track_history, &self.name);
        let snapshot = self.subscribers.snapshot();
        let result = self.dispatcher.dispatch(&snapshot, &envelope).await;
        self.metrics.record_send(&result);
        result
    }

    fn stats(&self) -> ChannelStats {
        self.metrics.snapshot()
    }
}

impl SubscribableChannel for DirectChannel {
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
