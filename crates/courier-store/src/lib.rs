//! # Courier Store - Message Store Abstraction
//!
//! Ordered persistence for buffered channel contents, addressed by a group
//! identifier. Queue and priority channels treat the store as the single
//! source of truth for what is buffered.
//!
//! ## Ordering
//!
//! | Ordering | `remove_first` returns |
//! |----------|------------------------|
//! | `Fifo` | lowest insertion sequence |
//! | `Priority` | highest `priority` header, then lowest sequence |
//!
//! ## Removal and Restore
//!
//! ```text
//! add(g, e) ──→ [seq=7, e] ──remove_first──→ StoredMessage{7, e}
//!                                    │
//!                                    └── restore(g, msg) ──→ back at seq=7
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryMessageStore;
pub use store::{MessageStore, StoreOrdering, StoredMessage};
