//! Endpoint, transaction and adapter errors.

use crate::transaction::TxHandle;
use courier_bus::{ChannelError, ConfigError};
use courier_types::ConsumerError;
use thiserror::Error;

/// Errors from transaction managers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Failed to begin transaction: {0}")]
    Begin(String),

    #[error("Failed to commit {tx}: {reason}")]
    Commit { tx: TxHandle, reason: String },

    #[error("Failed to roll back {tx}: {reason}")]
    Rollback { tx: TxHandle, reason: String },

    #[error("Transaction {0} is not active")]
    NotActive(TxHandle),
}

/// Errors from polling endpoints.
#[derive(Debug, Clone, Error)]
pub enum EndpointError {
    #[error("Endpoint '{0}' is already running")]
    AlreadyRunning(String),

    #[error("A Tokio runtime is required to start endpoint '{0}'")]
    NoRuntime(String),

    /// The consumer rejected an envelope.
    #[error("Consumer failed in endpoint '{endpoint}'")]
    Consumer {
        endpoint: String,
        #[source]
        source: ConsumerError,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from binding an outbound adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// A pollable channel needs a poller to drive the consumer.
    #[error("Adapter '{adapter}' needs a poller to consume from pollable channel '{channel}'")]
    PollerRequired { adapter: String, channel: String },

    /// Subscribable channels push to their consumers; a poller has nothing to poll.
    #[error("Adapter '{adapter}' has a poller but channel '{channel}' cannot be polled")]
    NotPollable { adapter: String, channel: String },

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}
