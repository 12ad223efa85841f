//! # Error Types
//!
//! | Error | Returned by | Meaning |
//! |-------|-------------|---------|
//! | `Timeout` | blocking send/receive | deadline elapsed, no partial state left |
//! | `NoSubscriber` | point-to-point send | nobody registered to take the message |
//! | `DeliveryFailure` | synchronous dispatch | a consumer failed; cause attached |
//! | `CapacityExceeded` | non-blocking send | bounded buffer or pool queue is full |
//! | `StoreInconsistency` | store-backed channels | backend corruption; channel halts |

use courier_store::{StoreError, StoreOrdering};
use courier_types::{ConsumerError, MessageId};
use std::time::Duration;
use thiserror::Error;

/// Errors from channel operations.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The operation's deadline elapsed.
    #[error("Operation on channel '{channel}' timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    /// Point-to-point send with no registered consumer.
    #[error("Channel '{channel}' has no subscriber")]
    NoSubscriber { channel: String },

    /// A consumer failed during synchronous dispatch.
    #[error("Delivery of message {message_id} on channel '{channel}' failed in '{consumer}'")]
    DeliveryFailure {
        channel: String,
        message_id: MessageId,
        consumer: String,
        #[source]
        source: ConsumerError,
    },

    /// Non-blocking send on a full bounded channel or saturated pool.
    #[error("Channel '{channel}' is at capacity ({capacity})")]
    CapacityExceeded { channel: String, capacity: usize },

    /// The message store violated its contract. Fatal for the channel.
    #[error("Message store inconsistency on channel '{channel}'")]
    StoreInconsistency {
        channel: String,
        #[source]
        source: StoreError,
    },

    /// The channel was halted by an earlier store inconsistency.
    #[error("Channel '{channel}' is halted")]
    Halted { channel: String },

    /// A non-fatal store backend error.
    #[error("Message store error on channel '{channel}'")]
    Store {
        channel: String,
        #[source]
        source: StoreError,
    },

    /// The channel or its worker pool has shut down.
    #[error("Channel '{channel}' is closed")]
    Closed { channel: String },

    /// The channel cannot put a received message back.
    #[error("Channel '{channel}' cannot restore received messages")]
    RestoreUnsupported { channel: String },
}

impl ChannelError {
    /// The channel (or pool) the error originated from.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::Timeout { channel, .. }
            | Self::NoSubscriber { channel }
            | Self::DeliveryFailure { channel, .. }
            | Self::CapacityExceeded { channel, .. }
            | Self::StoreInconsistency { channel, .. }
            | Self::Halted { channel }
            | Self::Store { channel, .. }
            | Self::Closed { channel }
            | Self::RestoreUnsupported { channel } => channel,
        }
    }

    /// True for `Timeout`.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from channel and pool construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Component name must not be empty")]
    EmptyName,

    #[error("Channel '{channel}': capacity must be greater than zero")]
    InvalidCapacity { channel: String },

    #[error("Channel '{channel}' requires a {expected} store, got {actual}")]
    StoreOrderingMismatch {
        channel: String,
        expected: StoreOrdering,
        actual: StoreOrdering,
    },

    #[error("Worker pool '{pool}': {detail}")]
    InvalidPool { pool: String, detail: String },

    #[error("A Tokio runtime is required to start '{component}'")]
    NoRuntime { component: String },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Errors from the channel registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Channel '{0}' is already registered")]
    Duplicate(String),

    #[error("Channel '{0}' is not registered")]
    NotFound(String),

    #[error("Channel '{name}' is a {actual} channel, expected {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}
