//! Store error types.

use courier_types::MessageId;
use thiserror::Error;

/// Errors from message store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The group already holds a message with this id.
    #[error("Message {message_id} already stored in group '{group}'")]
    Duplicate { group: String, message_id: MessageId },

    /// The store's internal bookkeeping no longer matches its contents.
    /// Indicates backend corruption; never retried.
    #[error("Store inconsistency in group '{group}': {detail}")]
    Inconsistent { group: String, detail: String },

    /// A backend operation failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for errors that must halt the owning channel.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Inconsistent { .. })
    }
}
