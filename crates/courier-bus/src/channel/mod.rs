//! # Channels
//!
//! ```text
//!                    ┌─────────────── push ───────────────┐
//! send(envelope) ──→ │ Direct · PublishSubscribe · Executor │ ──→ subscribers
//!                    └─────────────────────────────────────┘
//!                    ┌─────────────── pull ───────────────┐
//! send(envelope) ──→ │ Queue · Priority · Rendezvous        │ ←── receive()
//!                    └─────────────────────────────────────┘
//! ```
//!
//! ## Timeouts
//!
//! Every blocking operation takes `Option<Duration>`:
//!
//! - `None`: wait indefinitely
//! - `Some(Duration::ZERO)`: never wait
//! - `Some(d)`: wait up to `d`, then fail with `Timeout`

pub mod direct;
pub mod executor;
pub mod publish_subscribe;
pub mod queue;
pub mod rendezvous;

pub use direct::DirectChannel;
pub use executor::ExecutorChannel;
pub use publish_subscribe::PublishSubscribeChannel;
pub use queue::QueueChannel;
pub use rendezvous::RendezvousChannel;

use crate::error::ChannelError;
use crate::subscribers::SubscriptionId;
use async_trait::async_trait;
use courier_store::StoredMessage;
use courier_types::{Envelope, MessageConsumer, MessageHistory};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::time::Instant;

/// Channel variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Direct,
    Queue,
    Priority,
    Rendezvous,
    PublishSubscribe,
    Executor,
}

impl ChannelKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Queue => "queue",
            Self::Priority => "priority",
            Self::Rendezvous => "rendezvous",
            Self::PublishSubscribe => "publish-subscribe",
            Self::Executor => "executor",
        }
    }

    /// True for channels consumers pull from.
    #[must_use]
    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::Queue | Self::Priority | Self::Rendezvous)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a channel's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub send_failures: u64,
    pub received: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelMetrics {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
}

impl ChannelMetrics {
    pub(crate) fn record_send<T>(&self, result: &Result<T, ChannelError>) {
        let counter = if result.is_ok() {
            &self.sent
        } else {
            &self.send_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_receive(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

/// Every channel accepts envelopes.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    async fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError>;

    fn stats(&self) -> ChannelStats;
}

/// Push channels: consumers register and are invoked on send.
pub trait SubscribableChannel: MessageChannel {
    fn subscribe(&self, consumer: Arc<dyn MessageConsumer>) -> SubscriptionId;

    /// Returns false if the id was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn subscriber_count(&self) -> usize;
}

/// What to do with a held envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled; release it for good.
    Commit,
    /// Put it back where it was.
    Rollback,
}

/// An envelope received under a transaction, not yet settled.
#[derive(Debug)]
pub struct HeldEnvelope {
    envelope: Envelope,
    ticket: Option<StoredMessage>,
}

impl HeldEnvelope {
    /// A held envelope with nothing to restore.
    #[must_use]
    pub fn detached(envelope: Envelope) -> Self {
        Self {
            envelope,
            ticket: None,
        }
    }

    pub(crate) fn stored(message: StoredMessage) -> Self {
        Self {
            envelope: message.envelope.clone(),
            ticket: Some(message),
        }
    }

    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// True when the channel can put this envelope back.
    #[must_use]
    pub fn is_restorable(&self) -> bool {
        self.ticket.is_some()
    }

    pub(crate) fn into_ticket(self) -> Option<StoredMessage> {
        self.ticket
    }
}

/// Pull channels: consumers receive explicitly.
#[async_trait]
pub trait PollableChannel: MessageChannel {
    /// Removes and returns the next envelope.
    ///
    /// A non-blocking receive on an empty channel returns `Ok(None)`.
    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Envelope>, ChannelError>;

    /// Like `receive`, but the envelope stays accounted to the channel until
    /// [`settle`](Self::settle) is called.
    async fn receive_held(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<HeldEnvelope>, ChannelError> {
        Ok(self.receive(timeout).await?.map(HeldEnvelope::detached))
    }

    /// Commits or rolls back a held envelope.
    fn settle(&self, held: HeldEnvelope, disposition: Disposition) -> Result<(), ChannelError> {
        match disposition {
            Disposition::Commit => Ok(()),
            Disposition::Rollback => {
                drop(held);
                Err(ChannelError::RestoreUnsupported {
                    channel: self.name().to_string(),
                })
            }
        }
    }
}

/// A channel of any kind.
#[derive(Clone)]
pub enum Channel {
    Direct(Arc<DirectChannel>),
    Queue(Arc<QueueChannel>),
    Priority(Arc<QueueChannel>),
    Rendezvous(Arc<RendezvousChannel>),
    PublishSubscribe(Arc<PublishSubscribeChannel>),
    Executor(Arc<ExecutorChannel>),
}

impl Channel {
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.as_message_channel().kind()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Direct(c) => c.name(),
            Self::Queue(c) | Self::Priority(c) => c.name(),
            Self::Rendezvous(c) => c.name(),
            Self::PublishSubscribe(c) => c.name(),
            Self::Executor(c) => c.name(),
        }
    }

    pub async fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        self.as_message_channel().send(envelope, timeout).await
    }

    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.as_message_channel().stats()
    }

    #[must_use]
    pub fn as_message_channel(&self) -> Arc<dyn MessageChannel> {
        match self {
            Self::Direct(c) => Arc::clone(c) as Arc<dyn MessageChannel>,
            Self::Queue(c) | Self::Priority(c) => Arc::clone(c) as Arc<dyn MessageChannel>,
            Self::Rendezvous(c) => Arc::clone(c) as Arc<dyn MessageChannel>,
            Self::PublishSubscribe(c) => Arc::clone(c) as Arc<dyn MessageChannel>,
            Self::Executor(c) => Arc::clone(c) as Arc<dyn MessageChannel>,
        }
    }

    /// The pull view, for Queue, Priority and Rendezvous channels.
    #[must_use]
    pub fn as_pollable(&self) -> Option<Arc<dyn PollableChannel>> {
        match self {
            Self::Queue(c) | Self::Priority(c) => Some(Arc::clone(c) as Arc<dyn PollableChannel>),
            Self::Rendezvous(c) => Some(Arc::clone(c) as Arc<dyn PollableChannel>),
            _ => None,
        }
    }

    /// The push view, for Direct, PublishSubscribe and Executor channels.
    #[must_use]
    pub fn as_subscribable(&self) -> Option<Arc<dyn SubscribableChannel>> {
        match self {
            Self::Direct(c) => Some(Arc::clone(c) as Arc<dyn SubscribableChannel>),
            Self::PublishSubscribe(c) => Some(Arc::clone(c) as Arc<dyn SubscribableChannel>),
            Self::Executor(c) => Some(Arc::clone(c) as Arc<dyn SubscribableChannel>),
            _ => None,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl From<Arc<DirectChannel>> for Channel {
    fn from(c: Arc<DirectChannel>) -> Self {
        Self::Direct(c)
    }
}

impl From<Arc<QueueChannel>> for Channel {
    fn from(c: Arc<QueueChannel>) -> Self {
        match c.kind() {
            ChannelKind::Priority => Self::Priority(c),
            _ => Self::Queue(c),
        }
    }
}

impl From<Arc<RendezvousChannel>> for Channel {
    fn from(c: Arc<RendezvousChannel>) -> Self {
        Self::Rendezvous(c)
    }
}

impl From<Arc<PublishSubscribeChannel>> for Channel {
    fn from(c: Arc<PublishSubscribeChannel>) -> Self {
        Self::PublishSubscribe(c)
    }
}

impl From<Arc<ExecutorChannel>> for Channel {
    fn from(c: Arc<ExecutorChannel>) -> Self {
        Self::Executor(c)
    }
}

pub(crate) fn deadline_for(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

pub(crate) fn is_non_blocking(timeout: Option<Duration>) -> bool {
    timeout == Some(Duration::ZERO)
}

/// Waits on an enabled `Notified` until notified or the deadline passes.
/// Returns false on deadline.
pub(crate) async fn wait_until(notified: Pin<&mut Notified<'_>>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            notified.await;
            true
        }
        Some(deadline) => tokio::time::timeout_at(deadline, notified).await.is_ok(),
    }
}

/// Appends a history entry when tracking is on.
pub(crate) fn track(envelope: Envelope, enabled: bool, name: &str) -> Envelope {
    if enabled {
        MessageHistory::append(&envelope, name, "channel")
    } else {
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Channels;

    #[test]
    fn test_kind_names() {
        assert_eq!(ChannelKind::PublishSubscribe.to_string(), "publish-subscribe");
        assert!(ChannelKind::Rendezvous.is_pollable());
        assert!(!ChannelKind::Executor.is_pollable());
    }

    #[test]
    fn test_views_match_kind() {
        let queue = Channels::queue("q").build().unwrap();
        assert_eq!(queue.kind(), ChannelKind::Queue);
        assert!(queue.as_pollable().is_some());
        assert!(queue.as_subscribable().is_none());

        let priority = Channels::priority("p").build().unwrap();
        assert_eq!(priority.kind(), ChannelKind::Priority);
        assert!(matches!(priority, Channel::Priority(_)));

        let direct = Channels::direct("d").build().unwrap();
        assert!(direct.as_pollable().is_none());
        assert!(direct.as_subscribable().is_some());
        assert_eq!(direct.name(), "d");
    }

    #[tokio::test]
    async fn test_stats_count_sends() {
        let queue = Channels::queue("q").capacity(1).build().unwrap();
        queue.send(Envelope::new(1), Some(Duration::ZERO)).await.unwrap();
        assert!(queue.send(Envelope::new(2), Some(Duration::ZERO)).await.is_err());
        queue
            .as_pollable()
            .unwrap()
            .receive(Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(
            queue.stats(),
            ChannelStats {
                sent: 1,
                send_failures: 1,
                received: 1
            }
        );
    }

    #[tokio::test]
    async fn test_history_tracking() {
        let queue = Channels::queue("audit").track_history(true).build().unwrap();
        queue.send(Envelope::new("x"), None).await.unwrap();
        let received = queue
            .as_pollable()
            .unwrap()
            .receive(Some(Duration::ZERO))
            .await
            .unwrap()
            .unwrap();
        let history = MessageHistory::read(&received);
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].name, "audit");
    }
}
