//! # Courier Bus - Message Channels
//!
//! Channels connect producers to consumers inside one process.
//!
//! ## Channel Kinds
//!
//! | Kind | Model | Buffer | Delivery |
//! |------|-------|--------|----------|
//! | Direct | push | none | one subscriber, caller's task |
//! | Queue | pull | store group | FIFO |
//! | Priority | pull | store group | `priority` header, then FIFO |
//! | Rendezvous | pull | none | direct 1:1 hand-off |
//! | PublishSubscribe | push | none | every subscriber |
//! | Executor | push | pool queue | one subscriber, worker task |
//!
//! ```text
//! ┌──────────┐   send()   ┌─────────────┐  accept()  ┌──────────┐
//! │ Producer │ ─────────→ │   Channel   │ ─────────→ │ Consumer │
//! └──────────┘            │ (dispatch / │            └──────────┘
//!                         │  buffer)    │
//!                         └─────────────┘
//!                                │ receive()
//!                                ▼
//!                       PollingEndpoint (courier-endpoint)
//! ```
//!
//! ## Locking
//!
//! Each channel owns its locks. No lock is held across an `.await` or across
//! another channel's operation.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod builder;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod pool;
pub mod registry;
pub mod subscribers;

// Re-export main types
pub use builder::Channels;
pub use channel::{
    Channel, ChannelKind, ChannelStats, DirectChannel, Disposition, ExecutorChannel, HeldEnvelope,
    MessageChannel, PollableChannel, PublishSubscribeChannel, QueueChannel, RendezvousChannel,
    SubscribableChannel,
};
pub use config::{DispatcherConfig, MessagingDefaults, PublishSubscribeConfig, QueueConfig};
pub use dispatcher::{BroadcastDispatcher, DispatchOutcome, LoadBalancing, UnicastDispatcher};
pub use error::{ChannelError, ConfigError, RegistryError};
pub use error_handler::{
    DeliveryErrorEvent, ErrorChannelHandler, ErrorHandler, LoggingErrorHandler, SharedErrorHandler,
};
pub use pool::{Job, RejectionPolicy, WorkerPool, WorkerPoolConfig};
pub use registry::ChannelRegistry;
pub use subscribers::{Subscriber, SubscriptionId};

/// Queue capacity when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
