//! # Subscriber Registry
//!
//! Copy-on-write subscriber list. A dispatch takes an `Arc` snapshot and
//! iterates it without holding any lock, so subscribe/unsubscribe during a
//! dispatch never affects that dispatch.

use courier_types::MessageConsumer;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered consumer.
#[derive(Clone)]
pub struct Subscriber {
    pub id: SubscriptionId,
    pub consumer: Arc<dyn MessageConsumer>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("consumer", &self.consumer.name())
            .finish()
    }
}

/// Immutable view of the subscribers at one instant.
pub type SubscriberSnapshot = Arc<Vec<Subscriber>>;

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    snapshot: RwLock<SubscriberSnapshot>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, consumer: Arc<dyn MessageConsumer>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.snapshot.write();
        let mut next = Vec::clone(&guard);
        debug!(subscription = %id, consumer = consumer.name(), "Subscriber registered");
        next.push(Subscriber { id, consumer });
        *guard = Arc::new(next);
        id
    }

    /// Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.snapshot.write();
        if !guard.iter().any(|s| s.id == id) {
            return false;
        }
        let next: Vec<Subscriber> = guard.iter().filter(|s| s.id != id).cloned().collect();
        *guard = Arc::new(next);
        debug!(subscription = %id, "Subscriber removed");
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> SubscriberSnapshot {
        Arc::clone(&self.snapshot.read())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }
}
