//! The message store port.
//!
//! Implementations must be safe to share between channels and threads:
//! every method takes `&self`.

use crate::error::StoreError;
use courier_types::Envelope;

/// Retrieval order of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrdering {
    /// Insertion order.
    Fifo,
    /// `priority` header descending, insertion order among ties.
    Priority,
}

impl std::fmt::Display for StoreOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreOrdering::Fifo => write!(f, "fifo"),
            StoreOrdering::Priority => write!(f, "priority"),
        }
    }
}

/// A removed message together with its store-assigned position.
///
/// Handing it back to [`MessageStore::restore`] puts the envelope back at
/// the same position.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub sequence: u64,
    pub envelope: Envelope,
}

/// Ordered, group-addressed envelope storage.
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    fn ordering(&self) -> StoreOrdering;

    /// Appends an envelope to a group, returning its sequence number.
    ///
    /// # Errors
    /// - `Duplicate` if the group already holds this envelope id
    fn add(&self, group: &str, envelope: Envelope) -> Result<u64, StoreError>;

    /// Removes the next envelope in store order.
    fn remove_first(&self, group: &str) -> Result<Option<StoredMessage>, StoreError>;

    /// Puts a previously removed message back at its original position.
    fn restore(&self, group: &str, message: StoredMessage) -> Result<(), StoreError>;

    /// Number of envelopes held for a group.
    fn size(&self, group: &str) -> Result<usize, StoreError>;

    /// Names of all non-empty groups.
    fn groups(&self) -> Vec<String>;

    /// Drops a group, returning how many envelopes it held.
    fn remove_group(&self, group: &str) -> Result<usize, StoreError>;
}
