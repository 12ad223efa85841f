//! # In-Memory Message Store
//!
//! Each group keeps two indices:
//!
//! - `ordered`: O(log n) retrieval in store order (BTreeMap keyed by rank + sequence)
//! - `by_id`: O(1) duplicate detection by envelope id
//!
//! Both indices are updated under one write lock; a mismatch between them
//! is reported as [`StoreError::Inconsistent`].

use crate::error::StoreError;
use crate::store::{MessageStore, StoreOrdering, StoredMessage};
use courier_types::{Envelope, MessageId};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Position of an entry inside a group. Field order defines the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    /// Higher priority sorts first; always 0 for FIFO stores.
    rank: Reverse<i64>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct Group {
    ordered: BTreeMap<OrderKey, Envelope>,
    by_id: HashMap<MessageId, OrderKey>,
}

impl Group {
    fn check(&self, name: &str) -> Result<(), StoreError> {
        if self.ordered.len() != self.by_id.len() {
            return Err(StoreError::Inconsistent {
                group: name.to_string(),
                detail: format!(
                    "{} ordered entries but {} indexed ids",
                    self.ordered.len(),
                    self.by_id.len()
                ),
            });
        }
        Ok(())
    }
}

/// Process-local store; share it between channels with `Arc`.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    ordering: StoreOrdering,
    groups: RwLock<HashMap<String, Group>>,
    next_sequence: AtomicU64,
}

impl InMemoryMessageStore {
    pub fn new(ordering: StoreOrdering) -> Self {
        Self {
            ordering,
            groups: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Insertion-ordered store for queue channels.
    pub fn fifo() -> Self {
        Self::new(StoreOrdering::Fifo)
    }

    /// Priority-ordered store for priority channels.
    pub fn priority() -> Self {
        Self::new(StoreOrdering::Priority)
    }

    /// Total envelopes across all groups.
    pub fn total_size(&self) -> usize {
        self.groups.read().values().map(|g| g.ordered.len()).sum()
    }

    fn key_for(&self, envelope: &Envelope, sequence: u64) -> OrderKey {
        let rank = match self.ordering {
            StoreOrdering::Fifo => 0,
            StoreOrdering::Priority => envelope.priority(),
        };
        OrderKey {
            rank: Reverse(rank),
            sequence,
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::fifo()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn ordering(&self) -> StoreOrdering {
        self.ordering
    }

    fn add(&self, group: &str, envelope: Envelope) -> Result<u64, StoreError> {
        let mut groups = self.groups.write();
        let entry = groups.entry(group.to_string()).or_default();

        if entry.by_id.contains_key(&envelope.id()) {
            return Err(StoreError::Duplicate {
                group: group.to_string(),
                message_id: envelope.id(),
            });
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let key = self.key_for(&envelope, sequence);
        entry.by_id.insert(envelope.id(), key);
        entry.ordered.insert(key, envelope);
        Ok(sequence)
    }

    fn remove_first(&self, group: &str) -> Result<Option<StoredMessage>, StoreError> {
        let mut groups = self.groups.write();
        let Some(entry) = groups.get_mut(group) else {
            return Ok(None);
        };

        let Some((key, envelope)) = entry.ordered.pop_first() else {
            entry.check(group)?;
            return Ok(None);
        };

        if entry.by_id.remove(&envelope.id()).is_none() {
            error!(group = group, message_id = %envelope.id(), "Removed entry missing from id index");
            return Err(StoreError::Inconsistent {
                group: group.to_string(),
                detail: format!("message {} missing from id index", envelope.id()),
            });
        }

        if entry.ordered.is_empty() {
            groups.remove(group);
        }

        debug!(group = group, sequence = key.sequence, "Removed message from store");
        Ok(Some(StoredMessage {
            sequence: key.sequence,
            envelope,
        }))
    }

    fn restore(&self, group: &str, message: StoredMessage) -> Result<(), StoreError> {
        let mut groups = self.groups.write();
        let entry = groups.entry(group.to_string()).or_default();

        let id = message.envelope.id();
        if entry.by_id.contains_key(&id) {
            return Err(StoreError::Duplicate {
                group: group.to_string(),
                message_id: id,
            });
        }

        let key = self.key_for(&message.envelope, message.sequence);
        entry.by_id.insert(id, key);
        entry.ordered.insert(key, message.envelope);
        debug!(group = group, sequence = message.sequence, "Restored message to store");
        Ok(())
    }

    fn size(&self, group: &str) -> Result<usize, StoreError> {
        let groups = self.groups.read();
        match groups.get(group) {
            Some(entry) => {
                entry.check(group)?;
                Ok(entry.ordered.len())
            }
            None => Ok(0),
        }
    }

    fn groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups
            .read()
            .iter()
            .filter(|(_, g)| !g.ordered.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn remove_group(&self, group: &str) -> Result<usize, StoreError> {
        Ok(self
            .groups
            .write()
            .remove(group)
            .map(|g| g.ordered.len())
            .unwrap_or(0))
    }
}
