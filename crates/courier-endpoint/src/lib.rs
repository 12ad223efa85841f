//! # Courier Endpoint - Consuming From Channels
//!
//! Drives consumers from channels that do not push.
//!
//! - [`PollingEndpoint`]: trigger-driven receive loop over a pollable channel
//! - [`TransactionScope`]: receive that is rolled back unless committed
//! - [`OutboundChannelAdapter`]: subscribes or polls depending on the channel
//!
//! ```text
//! Trigger ──fire──→ PollingEndpoint ──receive──→ Queue / Priority / Rendezvous
//!                        │
//!                        ├──accept──→ Consumer
//!                        └──failure─→ ErrorHandler
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapter;
pub mod error;
pub mod poller;
pub mod transaction;
pub mod trigger;

// Re-export main types
pub use adapter::{AdapterBinding, FnConsumer, OutboundChannelAdapter, PollerSpec};
pub use error::{AdapterError, EndpointError, TransactionError};
pub use poller::{
    EndpointState, EndpointStats, PollReport, PollerConfig, PollingEndpoint, PollingEndpointBuilder,
};
pub use transaction::{
    CommitFailure, PseudoTransactionManager, TransactionManager, TransactionScope, TxHandle,
};
pub use trigger::{PeriodicTrigger, Trigger};
