//! # Dispatchers
//!
//! Decide which subscribers receive an envelope and invoke them.
//!
//! - [`UnicastDispatcher`]: exactly one subscriber handles each envelope
//!   (round-robin, with optional failover)
//! - [`BroadcastDispatcher`]: every subscriber gets a copy; failures are
//!   collected, never short-circuit
//!
//! Both work on a [`Subscriber`] slice taken from a snapshot, so registry
//! changes during a dispatch do not affect it.

use crate::config::DispatcherConfig;
use crate::error::ChannelError;
use crate::error_handler::{DeliveryErrorEvent, SharedErrorHandler};
use crate::pool::WorkerPool;
use crate::subscribers::Subscriber;
use courier_types::{headers, Envelope};
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Subscriber selection for point-to-point dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancing {
    /// Rotate the starting subscriber on every dispatch.
    #[default]
    RoundRobin,
    /// Always start from the first subscriber.
    None,
}

/// Invokes one subscriber, then returns.
#[derive(Debug)]
pub struct UnicastDispatcher {
    channel: String,
    config: DispatcherConfig,
    next: AtomicUsize,
}

impl UnicastDispatcher {
    pub fn new(channel: impl Into<String>, config: DispatcherConfig) -> Self {
        Self {
            channel: channel.into(),
            config,
            next: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Delivers `envelope` to one subscriber.
    ///
    /// # Errors
    /// - `NoSubscriber` when `subscribers` is empty
    /// - `DeliveryFailure` from the last subscriber tried
    pub async fn dispatch(
        &self,
        subscribers: &[Subscriber],
        envelope: &Envelope,
    ) -> Result<(), ChannelError> {
        if subscribers.is_empty() {
            return Err(ChannelError::NoSubscriber {
                channel: self.channel.clone(),
            });
        }

        let count = subscribers.len();
        let start = match self.config.load_balancing {
            LoadBalancing::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % count,
            LoadBalancing::None => 0,
        };
        let attempts = if self.config.failover { count } else { 1 };

        let mut last_failure = None;
        for offset in 0..attempts {
            let subscriber = &subscribers[(start + offset) % count];
            match subscriber.consumer.accept(envelope.clone()).await {
                Ok(()) => {
                    debug!(
                        channel = %self.channel,
                        message_id = %envelope.id(),
                        subscriber = %subscriber.id,
                        "Message dispatched"
                    );
                    return Ok(());
                }
                Err(source) => {
                    if offset + 1 < attempts {
                        warn!(
                            channel = %self.channel,
                            message_id = %envelope.id(),
                            subscriber = %subscriber.id,
                            error = %source,
                            "Subscriber failed, failing over"
                        );
                    }
                    last_failure = Some(ChannelError::DeliveryFailure {
                        channel: self.channel.clone(),
                        message_id: envelope.id(),
                        consumer: subscriber.consumer.name().to_string(),
                        source,
                    });
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| ChannelError::NoSubscriber {
            channel: self.channel.clone(),
        }))
    }
}

/// Result of a broadcast.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Subscribers that accepted (or, with a pool, jobs submitted).
    pub delivered: usize,
    pub failures: Vec<ChannelError>,
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Invokes every subscriber.
pub struct BroadcastDispatcher {
    channel: String,
    apply_sequence: bool,
    pool: Option<Arc<WorkerPool>>,
    error_handler: SharedErrorHandler,
}

impl BroadcastDispatcher {
    pub fn new(
        channel: impl Into<String>,
        apply_sequence: bool,
        pool: Option<Arc<WorkerPool>>,
        error_handler: SharedErrorHandler,
    ) -> Self {
        Self {
            channel: channel.into(),
            apply_sequence,
            pool,
            error_handler,
        }
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.pool.is_some()
    }

    /// Delivers a copy to every subscriber.
    ///
    /// Synchronous mode awaits each subscriber in order and collects the
    /// failures. With a pool each delivery is a separate job; consumer
    /// failures then go to the error handler and only submission failures
    /// appear in the outcome.
    pub async fn dispatch(&self, subscribers: &[Subscriber], envelope: &Envelope) -> DispatchOutcome {
        let total = subscribers.len();
        let mut outcome = DispatchOutcome::default();

        for (index, subscriber) in subscribers.iter().enumerate() {
            let copy = if self.apply_sequence {
                envelope
                    .with_header(headers::SEQUENCE_NUMBER, index + 1)
                    .with_header(headers::SEQUENCE_SIZE, total)
            } else {
                envelope.clone()
            };

            match &self.pool {
                None => match subscriber.consumer.accept(copy).await {
                    Ok(()) => outcome.delivered += 1,
                    Err(source) => {
                        warn!(
                            channel = %self.channel,
                            message_id = %envelope.id(),
                            subscriber = %subscriber.id,
                            error = %source,
                            "Subscriber failed"
                        );
                        outcome.failures.push(ChannelError::DeliveryFailure {
                            channel: self.channel.clone(),
                            message_id: envelope.id(),
                            consumer: subscriber.consumer.name().to_string(),
                            source,
                        });
                    }
                },
                Some(pool) => {
                    let job = delivery_job(
                        self.channel.clone(),
                        subscriber.clone(),
                        copy,
                        Arc::clone(&self.error_handler),
                    );
                    match pool.submit(job, None).await {
                        Ok(()) => outcome.delivered += 1,
                        Err(e) => {
                            warn!(
                                channel = %self.channel,
                                pool = pool.name(),
                                error = %e,
                                "Delivery job rejected"
                            );
                            outcome.failures.push(e);
                        }
                    }
                }
            }
        }

        debug!(
            channel = %self.channel,
            message_id = %envelope.id(),
            delivered = outcome.delivered,
            failed = outcome.failures.len(),
            "Broadcast complete"
        );
        outcome
    }
}

impl std::fmt::Debug for BroadcastDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastDispatcher")
            .field("channel", &self.channel)
            .field("apply_sequence", &self.apply_sequence)
            .field("pool", &self.pool.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

/// One subscriber delivery, reporting failure to the error handler.
pub(crate) fn delivery_job(
    channel: String,
    subscriber: Subscriber,
    envelope: Envelope,
    error_handler: SharedErrorHandler,
) -> crate::pool::Job {
    async move {
        if let Err(source) = subscriber.consumer.accept(envelope.clone()).await {
            let error = ChannelError::DeliveryFailure {
                channel: channel.clone(),
                message_id: envelope.id(),
                consumer: subscriber.consumer.name().to_string(),
                source,
            };
            error_handler
                .handle_error(DeliveryErrorEvent::new(channel, Some(envelope), error))
                .await;
        }
    }
    .boxed()
}
