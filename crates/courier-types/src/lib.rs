//! # Courier Types - Envelope and Consumer Contract
//!
//! Shared vocabulary for every courier crate.
//!
//! ## Contents
//!
//! - `envelope`: immutable [`Envelope`] (payload + headers), copy-on-write header updates
//! - `headers`: [`Headers`] map with the reserved `id` / `timestamp` entries
//! - `history`: [`MessageHistory`] tracking the components an envelope passed through
//! - `consumer`: the [`MessageConsumer`] capability every channel dispatches to
//!
//! ## Envelope Identity
//!
//! ```text
//! Envelope::new(payload)
//!     │  assigns id (UUID v4) + timestamp
//!     ▼
//! ┌──────────────────────────┐   with_header(k, v)   ┌──────────────────────────┐
//! │ headers: Arc<Headers>    │ ────────────────────→ │ headers: Arc<Headers'>   │
//! │ payload: Arc<Value>      │ ──── shared ────────→ │ payload: (same Arc)      │
//! └──────────────────────────┘                       └──────────────────────────┘
//!        original unchanged                               same id, one value for k
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod consumer;
pub mod envelope;
pub mod headers;
pub mod history;

pub use consumer::{ConsumerError, MessageConsumer};
pub use envelope::{Envelope, EnvelopeBuilder, MessageId};
pub use headers::{HeaderValue, Headers};
pub use history::{HistoryEntry, MessageHistory};

/// Milliseconds since the UNIX epoch.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}
