//! # Courier Test Suite
//!
//! Cross-crate flows: channels from `courier-bus` driven by endpoints from
//! `courier-endpoint` over stores from `courier-store`.
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs        # producer → channel → endpoint → consumer
//!     └── concurrency.rs  # many producers and consumers on one channel
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p courier-tests
//! cargo test -p courier-tests integration::concurrency::
//! ```

#![allow(dead_code)]

#[cfg(test)]
mod integration;
