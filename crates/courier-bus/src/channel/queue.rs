//! # Queue and Priority Channels
//!
//! Buffered point-to-point channels backed by a [`MessageStore`] group.
//! The store is the source of truth for buffered envelopes; the channel only
//! tracks envelopes held by in-flight transactions and wakes waiters.
//!
//! ```text
//! send ──→ [capacity check: size + in_flight < capacity] ──→ store.add
//! receive ←── store.remove_first ←── (FIFO | priority desc, FIFO ties)
//! ```
//!
//! A fatal store error halts the channel: every later operation fails with
//! `Halted`, and blocked callers are woken to observe it.

use super::{
    deadline_for, is_non_blocking, track, wait_until, ChannelKind, ChannelMetrics, ChannelStats,
    Disposition, HeldEnvelope, MessageChannel, PollableChannel,
};
use crate::config::QueueConfig;
use crate::error::{ChannelError, ConfigError};
use async_trait::async_trait;
use courier_store::{InMemoryMessageStore, MessageStore, StoreError, StoreOrdering, StoredMessage};
use courier_types::Envelope;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct QueueState {
    /// Received under a transaction, not yet settled. Counted against capacity.
    in_flight: usize,
}

/// Bounded or unbounded store-backed channel.
#[derive(Debug)]
pub struct QueueChannel {
    name: String,
    kind: ChannelKind,
    group: String,
    capacity: Option<usize>,
    store: Arc<dyn MessageStore>,
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
    halted: AtomicBool,
    track_history: bool,
    metrics: ChannelMetrics,
}

impl QueueChannel {
    /// FIFO channel over a private in-memory store.
    pub fn queue(name: impl Into<String>, config: QueueConfig) -> Result<Self, ConfigError> {
        Self::with_store(
            name,
            ChannelKind::Queue,
            Arc::new(InMemoryMessageStore::fifo()),
            config,
        )
    }

    /// Priority channel over a private in-memory store.
    pub fn priority(name: impl Into<String>, config: QueueConfig) -> Result<Self, ConfigError> {
        Self::with_store(
            name,
            ChannelKind::Priority,
            Arc::new(InMemoryMessageStore::priority()),
            config,
        )
    }

    /// Channel over a shared store. Envelopes already in the group are
    /// visible immediately.
    ///
    /// # Errors
    /// - `StoreOrderingMismatch` when the store's ordering does not suit `kind`
    /// - `InvalidCapacity` / `EmptyName` from the config
    pub fn with_store(
        name: impl Into<String>,
        kind: ChannelKind,
        store: Arc<dyn MessageStore>,
        config: QueueConfig,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        config.validate(&name)?;

        let expected = match kind {
            ChannelKind::Queue => StoreOrdering::Fifo,
            ChannelKind::Priority => StoreOrdering::Priority,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "kind".to_string(),
                    value: other.to_string(),
                })
            }
        };
        if store.ordering() != expected {
            return Err(ConfigError::StoreOrderingMismatch {
                channel: name,
                expected,
                actual: store.ordering(),
            });
        }

        let group = config.group.unwrap_or_else(|| name.clone());
        Ok(Self {
            name,
            kind,
            group,
            capacity: config.capacity,
            store,
            state: Mutex::new(QueueState::default()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            halted: AtomicBool::new(false),
            track_history: config.track_history,
            metrics: ChannelMetrics::default(),
        })
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Envelopes currently buffered (held envelopes excluded).
    pub fn queue_size(&self) -> Result<usize, ChannelError> {
        self.check_halted()?;
        self.store.size(&self.group).map_err(|e| self.store_error(e))
    }

    /// Free slots, or `None` when unbounded.
    pub fn remaining_capacity(&self) -> Result<Option<usize>, ChannelError> {
        let Some(capacity) = self.capacity else {
            return Ok(None);
        };
        let in_flight = self.state.lock().in_flight;
        let size = self.queue_size()?;
        Ok(Some(capacity.saturating_sub(size + in_flight)))
    }

    /// Envelopes received under a transaction and not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Removes and returns every buffered envelope.
    pub fn purge(&self) -> Result<Vec<Envelope>, ChannelError> {
        let mut purged = Vec::new();
        while let Some(message) = self.try_pop(false)? {
            purged.push(message.envelope);
        }
        if !purged.is_empty() {
            self.not_full.notify_waiters();
            debug!(channel = %self.name, purged = purged.len(), "Queue purged");
        }
        Ok(purged)
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn check_halted(&self) -> Result<(), ChannelError> {
        if self.is_halted() {
            return Err(ChannelError::Halted {
                channel: self.name.clone(),
            });
        }
        Ok(())
    }

    fn store_error(&self, source: StoreError) -> ChannelError {
        if source.is_fatal() {
            if !self.halted.swap(true, Ordering::AcqRel) {
                error!(channel = %self.name, group = %self.group, error = %source, "Store inconsistency, halting channel");
                self.not_empty.notify_waiters();
                self.not_full.notify_waiters();
            }
            ChannelError::StoreInconsistency {
                channel: self.name.clone(),
                source,
            }
        } else {
            ChannelError::Store {
                channel: self.name.clone(),
                source,
            }
        }
    }

    /// Adds the envelope if there is room. Returns false when full.
    fn try_push(&self, envelope: &Envelope) -> Result<bool, ChannelError> {
        let state = self.state.lock();
        self.check_halted()?;

        if let Some(capacity) = self.capacity {
            let size = self
                .store
                .size(&self.group)
                .map_err(|e| self.store_error(e))?;
            if size + state.in_flight >= capacity {
                return Ok(false);
            }
        }
        self.store
            .add(&self.group, envelope.clone())
            .map_err(|e| self.store_error(e))?;
        drop(state);

        self.not_empty.notify_one();
        Ok(true)
    }

    /// Removes the next envelope, counting it as in flight when `hold` is set.
    fn try_pop(&self, hold: bool) -> Result<Option<StoredMessage>, ChannelError> {
        let mut state = self.state.lock();
        self.check_halted()?;

        let message = self
            .store
            .remove_first(&self.group)
            .map_err(|e| self.store_error(e))?;
        if message.is_some() && hold {
            state.in_flight += 1;
        }
        drop(state);

        if message.is_some() && !hold {
            self.not_full.notify_one();
        }
        Ok(message)
    }

    async fn send_inner(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        self.check_halted()?;
        let envelope = track(envelope, self.track_history, &self.name);
        let deadline = deadline_for(timeout);

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_push(&envelope)? {
                debug!(channel = %self.name, message_id = %envelope.id(), "Message buffered");
                return Ok(());
            }

            if is_non_blocking(timeout) {
                return Err(ChannelError::CapacityExceeded {
                    channel: self.name.clone(),
                    capacity: self.capacity.unwrap_or_default(),
                });
            }
            if !wait_until(notified.as_mut(), deadline).await {
                return Err(ChannelError::Timeout {
                    channel: self.name.clone(),
                    timeout: timeout.unwrap_or_default(),
                });
            }
        }
    }

    async fn receive_inner(
        &self,
        timeout: Option<Duration>,
        hold: bool,
    ) -> Result<Option<StoredMessage>, ChannelError> {
        let deadline = deadline_for(timeout);

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop(hold)? {
                self.metrics.record_receive();
                return Ok(Some(message));
            }

            if is_non_blocking(timeout) {
                return Ok(None);
            }
            if !wait_until(notified.as_mut(), deadline).await {
                return Err(ChannelError::Timeout {
                    channel: self.name.clone(),
                    timeout: timeout.unwrap_or_default(),
                });
            }
        }
    }
}

#[async_trait]
impl MessageChannel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let result = self.send_inner(envelope, timeout).await;
        self.metrics.record_send(&result);
        result
    }

    fn stats(&self) -> ChannelStats {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl PollableChannel for QueueChannel {
    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Envelope>, ChannelError> {
        Ok(self
            .receive_inner(timeout, false)
            .await?
            .map(|message| message.envelope))
    }

    async fn receive_held(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<HeldEnvelope>, ChannelError> {
        Ok(self
            .receive_inner(timeout, true)
            .await?
            .map(HeldEnvelope::stored))
    }

    fn settle(&self, held: HeldEnvelope, disposition: Disposition) -> Result<(), ChannelError> {
        let Some(message) = held.into_ticket() else {
            return match disposition {
                Disposition::Commit => Ok(()),
                Disposition::Rollback => Err(ChannelError::RestoreUnsupported {
                    channel: self.name.clone(),
                }),
            };
        };

        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        match disposition {
            Disposition::Commit => {
                drop(state);
                self.not_full.notify_one();
                Ok(())
            }
            Disposition::Rollback => {
                let id = message.envelope.id();
                let restored = self
                    .store
                    .restore(&self.group, message)
                    .map_err(|e| self.store_error(e));
                drop(state);

                match restored {
                    Ok(()) => {
                        debug!(channel = %self.name, message_id = %id, "Message restored");
                        self.not_empty.notify_one();
                        Ok(())
                    }
                    Err(e) => {
                        warn!(channel = %self.name, message_id = %id, error = %e, "Failed to restore message");
                        self.not_full.notify_one();
                        Err(e)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn bounded(capacity: usize) -> QueueChannel {
        QueueChannel::queue(
            "q",
            QueueConfig {
                capacity: Some(capacity),
                ..QueueConfig::default()
            },
        )
        .unwrap()
    }

    const NOW: Option<Duration> = Some(Duration::ZERO);

    /// Store whose removal path reports corruption.
    #[derive(Debug)]
    struct CorruptStore(InMemoryMessageStore);

    impl MessageStore for CorruptStore {
        fn ordering(&self) -> StoreOrdering {
            self.0.ordering()
        }
        fn add(&self, group: &str, envelope: Envelope) -> Result<u64, StoreError> {
            self.0.add(group, envelope)
        }
        fn remove_first(&self, group: &str) -> Result<Option<StoredMessage>, StoreError> {
            Err(StoreError::Inconsistent {
                group: group.to_string(),
                detail: "index desync".to_string(),
            })
        }
        fn restore(&self, group: &str, message: StoredMessage) -> Result<(), StoreError> {
            self.0.restore(group, message)
        }
        fn size(&self, group: &str) -> Result<usize, StoreError> {
            self.0.size(group)
        }
        fn groups(&self) -> Vec<String> {
            self.0.groups()
        }
        fn remove_group(&self, group: &str) -> Result<usize, StoreError> {
            self.0.remove_group(group)
        }
    }

    // =========================================================================
    // CAPACITY
    // =========================================================================

    #[tokio::test]
    async fn test_capacity_bound() {
        let q = bounded(3);
        for i in 0..3 {
            q.send(Envelope::new(i), NOW).await.unwrap();
        }
        let err = q.send(Envelope::new(3), NOW).await.unwrap_err();
        assert!(matches!(err, ChannelError::CapacityExceeded { capacity: 3, .. }));
        assert_eq!(q.queue_size().unwrap(), 3);
        assert_eq!(q.remaining_capacity().unwrap(), Some(0));

        q.receive(NOW).await.unwrap().unwrap();
        q.send(Envelope::new(4), NOW).await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_send_on_full_queue() {
        let q = bounded(1);
        q.send(Envelope::new(1), NOW).await.unwrap();

        let started = Instant::now();
        let err = q
            .send(Envelope::new(2), Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(q.queue_size().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_send_resumes_after_receive() {
        let q = Arc::new(bounded(1));
        q.send(Envelope::new("first"), NOW).await.unwrap();

        let sender = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.send(Envelope::new("second"), None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        assert_eq!(q.receive(NOW).await.unwrap().unwrap().payload(), &json!("first"));
        tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(q.receive(NOW).await.unwrap().unwrap().payload(), &json!("second"));
    }

    #[tokio::test]
    async fn test_unbounded_queue() {
        let q = QueueChannel::queue(
            "q",
            QueueConfig {
                capacity: None,
                ..QueueConfig::default()
            },
        )
        .unwrap();
        for i in 0..5000 {
            q.send(Envelope::new(i), NOW).await.unwrap();
        }
        assert_eq!(q.remaining_capacity().unwrap(), None);
        assert_eq!(q.queue_size().unwrap(), 5000);
    }

    // =========================================================================
    // RECEIVE
    // =========================================================================

    #[tokio::test]
    async fn test_receive_is_fifo() {
        let q = bounded(10);
        for i in 0..5 {
            q.send(Envelope::new(i), NOW).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.receive(NOW).await.unwrap().unwrap().payload(), &json!(i));
        }
    }

    #[tokio::test]
    async fn test_receive_empty() {
        let q = bounded(1);
        assert!(q.receive(NOW).await.unwrap().is_none());
        let err = q.receive(Some(Duration::from_millis(10))).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_receive_wakes_on_send() {
        let q = Arc::new(bounded(1));
        let receiver = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.receive(Some(Duration::from_secs(2))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.send(Envelope::new("late"), NOW).await.unwrap();

        let got = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(got.payload(), &json!("late"));
    }

    #[tokio::test]
    async fn test_priority_order() {
        let q = QueueChannel::priority("p", QueueConfig::default()).unwrap();
        for p in [1, 5, 3] {
            q.send(Envelope::builder(p).priority(p).build(), NOW)
                .await
                .unwrap();
        }
        let order: Vec<_> = [
            q.receive(NOW).await.unwrap().unwrap(),
            q.receive(NOW).await.unwrap().unwrap(),
            q.receive(NOW).await.unwrap().unwrap(),
        ]
        .iter()
        .map(|e| e.priority())
        .collect();
        assert_eq!(order, vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn test_purge() {
        let q = bounded(5);
        for i in 0..3 {
            q.send(Envelope::new(i), NOW).await.unwrap();
        }
        let purged = q.purge().unwrap();
        assert_eq!(purged.len(), 3);
        assert_eq!(q.queue_size().unwrap(), 0);
    }

    // =========================================================================
    // HELD RECEIVE
    // =========================================================================

    #[tokio::test]
    async fn test_held_envelope_counts_against_capacity() {
        let q = bounded(1);
        q.send(Envelope::new("a"), NOW).await.unwrap();
        let held = q.receive_held(NOW).await.unwrap().unwrap();
        assert!(held.is_restorable());
        assert_eq!(q.in_flight(), 1);
        assert_eq!(q.queue_size().unwrap(), 0);

        let err = q.send(Envelope::new("b"), NOW).await.unwrap_err();
        assert!(matches!(err, ChannelError::CapacityExceeded { .. }));

        q.settle(held, Disposition::Commit).unwrap();
        assert_eq!(q.in_flight(), 0);
        q.send(Envelope::new("b"), NOW).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_restores_original_position() {
        let q = bounded(3);
        let first = Envelope::new("first");
        q.send(first.clone(), NOW).await.unwrap();
        q.send(Envelope::new("second"), NOW).await.unwrap();

        let held = q.receive_held(NOW).await.unwrap().unwrap();
        assert_eq!(held.envelope(), &first);
        q.settle(held, Disposition::Rollback).unwrap();

        assert_eq!(q.queue_size().unwrap(), 2);
        assert_eq!(q.receive(NOW).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_detached_rollback_unsupported() {
        let q = bounded(1);
        let err = q
            .settle(HeldEnvelope::detached(Envelope::new(1)), Disposition::Rollback)
            .unwrap_err();
        assert!(matches!(err, ChannelError::RestoreUnsupported { .. }));
    }

    // =========================================================================
    // STORE
    // =========================================================================

    #[tokio::test]
    async fn test_rehydrates_from_shared_store() {
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::fifo());
        let config = QueueConfig {
            group: Some("orders".into()),
            ..QueueConfig::default()
        };
        let before = QueueChannel::with_store("a", ChannelKind::Queue, Arc::clone(&store), config.clone())
            .unwrap();
        before.send(Envelope::new("pending"), NOW).await.unwrap();
        drop(before);

        let after =
            QueueChannel::with_store("b", ChannelKind::Queue, Arc::clone(&store), config).unwrap();
        assert_eq!(after.queue_size().unwrap(), 1);
        assert_eq!(
            after.receive(NOW).await.unwrap().unwrap().payload(),
            &json!("pending")
        );
    }

    #[test]
    fn test_store_ordering_mismatch() {
        let err = QueueChannel::with_store(
            "p",
            ChannelKind::Priority,
            Arc::new(InMemoryMessageStore::fifo()),
            QueueConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::StoreOrderingMismatch { .. }));
    }

    #[tokio::test]
    async fn test_store_inconsistency_halts_channel() {
        let q = QueueChannel::with_store(
            "q",
            ChannelKind::Queue,
            Arc::new(CorruptStore(InMemoryMessageStore::fifo())),
            QueueConfig::default(),
        )
        .unwrap();
        q.send(Envelope::new(1), NOW).await.unwrap();

        let err = q.receive(NOW).await.unwrap_err();
        assert!(matches!(err, ChannelError::StoreInconsistency { .. }));
        assert!(q.is_halted());

        assert!(matches!(
            q.send(Envelope::new(2), NOW).await,
            Err(ChannelError::Halted { .. })
        ));
        assert!(matches!(q.receive(NOW).await, Err(ChannelError::Halted { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_send_is_store_error() {
        let q = bounded(5);
        let e = Envelope::new(1);
        q.send(e.clone(), NOW).await.unwrap();
        let err = q.send(e, NOW).await.unwrap_err();
        assert!(matches!(err, ChannelError::Store { .. }));
        assert!(!q.is_halted());
    }
}
