//! # Polling Endpoint
//!
//! Drives a consumer from a pollable channel on a trigger.
//!
//! ```text
//!            start()              stop()
//! Stopped ──────────→ Running ──────────→ Stopping ──→ Stopped
//!                        │                   (in-flight poll finishes)
//!                        └─ trigger returns None ─────────→ Stopped
//! ```
//!
//! Each fire runs one poll: up to `max_messages_per_poll` receive-and-handle
//! cycles. A poll ends early when the channel is empty or a cycle fails.
//! Failures go to the error handler; they never stop the endpoint.
//!
//! A stop request interrupts a receive that is still waiting. An envelope
//! already received is always handled to completion.

use crate::error::EndpointError;
use crate::transaction::{TransactionManager, TransactionScope};
use crate::trigger::{PeriodicTrigger, Trigger};
use courier_bus::error_handler::default_error_handler;
use courier_bus::{
    ConfigError, DeliveryErrorEvent, MessageChannel, MessagingDefaults, PollableChannel,
    SharedErrorHandler,
};
use courier_types::{ConsumerError, Envelope, MessageConsumer};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-poll limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub max_messages_per_poll: usize,
    /// Wait per receive; `Some(ZERO)` never blocks.
    pub receive_timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_messages_per_poll: 1,
            receive_timeout: Some(Duration::ZERO),
        }
    }
}

impl PollerConfig {
    #[must_use]
    pub fn from_defaults(defaults: &MessagingDefaults) -> Self {
        Self {
            max_messages_per_poll: defaults.poll_max_messages,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages_per_poll == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_messages_per_poll".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Stopped,
    Running,
    /// Stop requested; the in-flight poll is finishing.
    Stopping,
}

/// Snapshot of endpoint counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub polls: u64,
    pub received: u64,
    pub handled: u64,
    pub failed: u64,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: usize,
    pub handled: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    polls: AtomicU64,
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
}

enum Cycle {
    Empty,
    /// Stop requested while waiting to receive.
    Stopped,
    Handled,
    Failed { received: bool },
}

struct EndpointInner {
    name: String,
    channel: Arc<dyn PollableChannel>,
    consumer: Arc<dyn MessageConsumer>,
    trigger: Arc<dyn Trigger>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    error_handler: SharedErrorHandler,
    config: PollerConfig,
    state: Mutex<EndpointState>,
    counters: Counters,
}

struct RunHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Spawned poll loop over a pollable channel.
pub struct PollingEndpoint {
    inner: Arc<EndpointInner>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl PollingEndpoint {
    pub fn builder(
        name: impl Into<String>,
        channel: Arc<dyn PollableChannel>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> PollingEndpointBuilder {
        PollingEndpointBuilder {
            name: name.into(),
            channel,
            consumer,
            trigger: None,
            transaction_manager: None,
            error_handler: None,
            config: PollerConfig::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.inner.state.lock()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EndpointState::Running
    }

    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.inner.transaction_manager.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> EndpointStats {
        let c = &self.inner.counters;
        EndpointStats {
            polls: c.polls.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            handled: c.handled.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Spawns the poll loop on the current runtime.
    ///
    /// # Errors
    /// - `AlreadyRunning` unless the endpoint is `Stopped`
    /// - `NoRuntime` outside a Tokio runtime
    pub async fn start(&self) -> Result<(), EndpointError> {
        let mut run = self.run.lock().await;
        {
            let mut state = self.inner.state.lock();
            if *state != EndpointState::Stopped {
                return Err(EndpointError::AlreadyRunning(self.inner.name.clone()));
            }
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|_| EndpointError::NoRuntime(self.inner.name.clone()))?;

            let (shutdown, signal) = watch::channel(false);
            let task = runtime.spawn(run_loop(Arc::clone(&self.inner), signal));
            *state = EndpointState::Running;
            *run = Some(RunHandle { shutdown, task });
        }

        info!(
            endpoint = %self.inner.name,
            channel = self.inner.channel.name(),
            transactional = self.is_transactional(),
            "Polling endpoint started"
        );
        Ok(())
    }

    /// Requests a stop and waits for the in-flight poll to complete.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(handle) = run.take() else {
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if *state == EndpointState::Running {
                *state = EndpointState::Stopping;
            }
        }
        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            warn!(endpoint = %self.inner.name, error = %e, "Poll loop ended abnormally");
        }

        *self.inner.state.lock() = EndpointState::Stopped;
        info!(endpoint = %self.inner.name, "Polling endpoint stopped");
    }

    /// Runs one poll in the caller's task.
    pub async fn poll_once(&self) -> PollReport {
        let (_keep, mut never) = watch::channel(false);
        self.inner.poll(&mut never).await
    }
}

impl std::fmt::Debug for PollingEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEndpoint")
            .field("name", &self.inner.name)
            .field("channel", &self.inner.channel.name())
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

async fn run_loop(inner: Arc<EndpointInner>, mut shutdown: watch::Receiver<bool>) {
    let mut last_fire: Option<Instant> = None;

    loop {
        let Some(delay) = inner.trigger.next_fire_delay(last_fire) else {
            info!(endpoint = %inner.name, "Trigger exhausted, endpoint stopping");
            break;
        };

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if *shutdown.borrow() {
            break;
        }

        last_fire = Some(Instant::now());
        inner.poll(&mut shutdown).await;
        if *shutdown.borrow() {
            break;
        }
    }

    *inner.state.lock() = EndpointState::Stopped;
}

/// Runs `receive` unless a stop is requested first. `None` means stopped.
///
/// Channel receives are cancel safe: a dropped receive holds nothing.
async fn unless_stopped<F, T>(shutdown: &mut watch::Receiver<bool>, receive: F) -> Option<T>
where
    F: Future<Output = T>,
{
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        _ = shutdown.changed() => None,
        result = receive => Some(result),
    }
}

impl EndpointInner {
    async fn poll(&self, shutdown: &mut watch::Receiver<bool>) -> PollReport {
        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        let mut report = PollReport::default();

        for _ in 0..self.config.max_messages_per_poll {
            let cycle = match &self.transaction_manager {
                Some(manager) => self.transactional_cycle(Arc::clone(manager), shutdown).await,
                None => self.plain_cycle(shutdown).await,
            };
            match cycle {
                Cycle::Empty | Cycle::Stopped => break,
                Cycle::Handled => {
                    report.received += 1;
                    report.handled += 1;
                }
                Cycle::Failed { received } => {
                    if received {
                        report.received += 1;
                    }
                    report.failed += 1;
                    break;
                }
            }
        }

        let c = &self.counters;
        c.received.fetch_add(report.received as u64, Ordering::Relaxed);
        c.handled.fetch_add(report.handled as u64, Ordering::Relaxed);
        c.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        if report.received > 0 || report.failed > 0 {
            debug!(
                endpoint = %self.name,
                received = report.received,
                handled = report.handled,
                failed = report.failed,
                "Poll complete"
            );
        }
        report
    }

    async fn plain_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Cycle {
        let received = unless_stopped(shutdown, self.channel.receive(self.config.receive_timeout)).await;
        let Some(received) = received else {
            return Cycle::Stopped;
        };
        let envelope = match received {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Cycle::Empty,
            Err(e) if e.is_timeout() => return Cycle::Empty,
            Err(e) => {
                self.report(None, EndpointError::Channel(e), false).await;
                return Cycle::Failed { received: false };
            }
        };

        match self.invoke(envelope.clone()).await {
            Ok(()) => Cycle::Handled,
            Err(e) => {
                self.report(Some(envelope), e, false).await;
                Cycle::Failed { received: true }
            }
        }
    }

    async fn transactional_cycle(
        &self,
        manager: Arc<dyn TransactionManager>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Cycle {
        let mut scope = match TransactionScope::begin(Arc::clone(&self.channel), manager) {
            Ok(scope) => scope,
            Err(e) => {
                self.report(None, EndpointError::Transaction(e), false).await;
                return Cycle::Failed { received: false };
            }
        };

        let received = unless_stopped(shutdown, scope.receive(self.config.receive_timeout)).await;
        let Some(received) = received else {
            // Nothing is held yet; the scope ends with nothing to restore.
            return match self.finish_empty(scope).await {
                Cycle::Empty => Cycle::Stopped,
                other => other,
            };
        };
        let envelope = match received {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return self.finish_empty(scope).await,
            Err(e) if e.is_timeout() => return self.finish_empty(scope).await,
            Err(e) => {
                scope.rollback();
                self.report(None, EndpointError::Channel(e), false).await;
                return Cycle::Failed { received: false };
            }
        };

        match self.invoke(envelope.clone()).await {
            Ok(()) => match scope.commit() {
                Ok(()) => Cycle::Handled,
                Err(failure) => {
                    self.report(
                        Some(envelope),
                        EndpointError::Transaction(failure.error),
                        failure.restored,
                    )
                    .await;
                    Cycle::Failed { received: true }
                }
            },
            Err(e) => {
                let restored = scope.rollback();
                self.report(Some(envelope), e, restored).await;
                Cycle::Failed { received: true }
            }
        }
    }

    async fn finish_empty(&self, scope: TransactionScope) -> Cycle {
        match scope.commit() {
            Ok(()) => Cycle::Empty,
            Err(failure) => {
                self.report(None, EndpointError::Transaction(failure.error), false)
                    .await;
                Cycle::Failed { received: false }
            }
        }
    }

    /// Calls the consumer; a panic counts as a consumer failure.
    async fn invoke(&self, envelope: Envelope) -> Result<(), EndpointError> {
        let outcome = AssertUnwindSafe(self.consumer.accept(envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ConsumerError::new("consumer panicked")));
        outcome.map_err(|source| EndpointError::Consumer {
            endpoint: self.name.clone(),
            source,
        })
    }

    async fn report(&self, envelope: Option<Envelope>, error: EndpointError, rolled_back: bool) {
        let event = DeliveryErrorEvent::new(self.name.clone(), envelope, error).rolled_back(rolled_back);
        self.error_handler.handle_error(event).await;
    }
}

pub struct PollingEndpointBuilder {
    name: String,
    channel: Arc<dyn PollableChannel>,
    consumer: Arc<dyn MessageConsumer>,
    trigger: Option<Arc<dyn Trigger>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    error_handler: Option<SharedErrorHandler>,
    config: PollerConfig,
}

impl PollingEndpointBuilder {
    /// Applies process-wide poll limits and period. An explicit `trigger`
    /// or `config` set afterwards still wins.
    #[must_use]
    pub fn defaults(mut self, defaults: &MessagingDefaults) -> Self {
        self.config = PollerConfig::from_defaults(defaults);
        self.trigger = Some(Arc::new(PeriodicTrigger::from_defaults(defaults)));
        self
    }

    /// Defaults to a fixed-delay trigger on the default poll period.
    #[must_use]
    pub fn trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.trigger = Some(trigger);
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

    #[must_use]
    pub fn max_messages_per_poll(mut self, max: usize) -> Self {
        self.config.max_messages_per_poll = max;
        self
    }

    #[must_use]
    pub fn receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    #[must_use]
    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<PollingEndpoint, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.config.validate()?;

        let trigger = self.trigger.unwrap_or_else(|| {
            Arc::new(PeriodicTrigger::from_defaults(&MessagingDefaults::default())) as Arc<dyn Trigger>
        });
        Ok(PollingEndpoint {
            inner: Arc::new(EndpointInner {
                name: self.name,
                channel: self.channel,
                consumer: self.consumer,
                trigger,
                transaction_manager: self.transaction_manager,
                error_handler: self.error_handler.unwrap_or_else(default_error_handler),
                config: self.config,
                state: Mutex::new(EndpointState::Stopped),
                counters: Counters::default(),
            }),
            run: tokio::sync::Mutex::new(None),
        })
    }
}
