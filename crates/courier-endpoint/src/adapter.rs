//! # Outbound Channel Adapter
//!
//! Connects a consumer to a channel. Subscribable channels get a direct
//! subscription; pollable channels get a [`PollingEndpoint`].

use crate::error::{AdapterError, EndpointError};
use crate::poller::{PollerConfig, PollingEndpoint};
use crate::transaction::TransactionManager;
use crate::trigger::Trigger;
use async_trait::async_trait;
use courier_bus::{Channel, SharedErrorHandler, SubscribableChannel, SubscriptionId};
use courier_types::{ConsumerError, Envelope, MessageConsumer};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Consumer backed by an async closure.
pub struct FnConsumer<F> {
    name: String,
    handler: F,
}

impl<F, Fut> FnConsumer<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> MessageConsumer for FnConsumer<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
{
    async fn accept(&self, envelope: Envelope) -> Result<(), ConsumerError> {
        (self.handler)(envelope).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Poller settings for an adapter bound to a pollable channel.
#[derive(Default, Clone)]
pub struct PollerSpec {
    trigger: Option<Arc<dyn Trigger>>,
    config: PollerConfig,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    error_handler: Option<SharedErrorHandler>,
}

impl PollerSpec {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn max_messages_per_poll(mut self, max: usize) -> Self {
        self.config.max_messages_per_poll = max;
        self
    }

    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    #[must_use]
    pub fn error_handler(mut self, handler: SharedErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }
}

impl fmt::Debug for PollerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerSpec")
            .field("config", &self.config)
            .field("transactional", &self.transaction_manager.is_some())
            .finish_non_exhaustive()
    }
}

pub struct OutboundChannelAdapter {
    name: String,
    consumer: Arc<dyn MessageConsumer>,
    poller: Option<PollerSpec>,
}

impl OutboundChannelAdapter {
    pub fn new(name: impl Into<String>, consumer: Arc<dyn MessageConsumer>) -> Self {
        Self {
            name: name.into(),
            consumer,
            poller: None,
        }
    }

    #[must_use]
    pub fn with_poller(mut self, poller: PollerSpec) -> Self {
        self.poller = Some(poller);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds the consumer to `channel` and starts delivery.
    ///
    /// # Errors
    /// - `PollerRequired` for a pollable channel without a poller
    /// - `NotPollable` for a subscribable channel with a poller
    /// - `Endpoint` if the polling endpoint cannot be built or started
    pub async fn bind(&self, channel: &Channel) -> Result<AdapterBinding, AdapterError> {
        match (&self.poller, channel.as_subscribable(), channel.as_pollable()) {
            (None, Some(subscribable), _) => {
                let id = subscribable.subscribe(Arc::clone(&self.consumer));
                info!(adapter = %self.name, channel = channel.name(), subscription = %id, "Adapter subscribed");
                Ok(AdapterBinding::Subscribed {
                    channel: subscribable,
                    id,
                })
            }
            (Some(poller), _, Some(pollable)) => {
                let mut builder =
                    PollingEndpoint::builder(self.name.clone(), pollable, Arc::clone(&self.consumer))
                        .config(poller.config);
                if let Some(trigger) = &poller.trigger {
                    builder = builder.trigger(Arc::clone(trigger));
                }
                if let Some(manager) = &poller.transaction_manager {
                    builder = builder.transaction_manager(Arc::clone(manager));
                }
                if let Some(handler) = &poller.error_handler {
                    builder = builder.error_handler(Arc::clone(handler));
                }
                let endpoint = builder.build().map_err(EndpointError::from)?;
                endpoint.start().await?;
                Ok(AdapterBinding::Polling(endpoint))
            }
            (None, None, _) => Err(AdapterError::PollerRequired {
                adapter: self.name.clone(),
                channel: channel.name().to_string(),
            }),
            (Some(_), _, None) => Err(AdapterError::NotPollable {
                adapter: self.name.clone(),
                channel: channel.name().to_string(),
            }),
        }
    }
}

impl fmt::Debug for OutboundChannelAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundChannelAdapter")
            .field("name", &self.name)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

/// A live adapter connection.
pub enum AdapterBinding {
    Subscribed {
        channel: Arc<dyn SubscribableChannel>,
        id: SubscriptionId,
    },
    Polling(PollingEndpoint),
}

impl fmt::Debug for AdapterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribed { channel, id } => f
                .debug_struct("Subscribed")
                .field("channel", &channel.name())
                .field("id", id)
                .finish(),
            Self::Polling(endpoint) => f.debug_tuple("Polling").field(endpoint).finish(),
        }
    }
}

impl AdapterBinding {
    /// Stops delivery to the consumer.
    pub async fn unbind(self) {
        match self {
            Self::Subscribed { channel, id } => {
                channel.unsubscribe(id);
            }
            Self::Polling(endpoint) => endpoint.stop().await,
        }
    }
}
