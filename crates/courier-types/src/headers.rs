//! # Header Contract
//!
//! Headers are a unique-key mapping from `String` to an opaque JSON value.
//! Two entries are reserved and read-only once an envelope exists:
//!
//! | Key | Type | Assigned |
//! |-----|------|----------|
//! | `id` | UUID v4 | at envelope creation, never reassigned |
//! | `timestamp` | `u64` millis | at envelope creation |
//!
//! Everything else lives in an ordered map so iteration is deterministic.

use crate::envelope::MessageId;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Header values are opaque to the channel layer.
pub type HeaderValue = Value;

/// Unique message identifier.
pub const ID: &str = "id";
/// Creation time in milliseconds since the UNIX epoch.
pub const TIMESTAMP: &str = "timestamp";
/// Integer priority used by priority channels (higher first, default 0).
pub const PRIORITY: &str = "priority";
/// Component history, see [`crate::MessageHistory`].
pub const HISTORY: &str = "history";
/// 1-based position of a broadcast copy.
pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
/// Number of copies produced by one broadcast.
pub const SEQUENCE_SIZE: &str = "sequenceSize";
/// Carried by error envelopes: id of the envelope that failed.
pub const ORIGINAL_MESSAGE_ID: &str = "originalMessageId";

/// Returns true for keys that cannot be changed after creation.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key == ID || key == TIMESTAMP
}

/// Envelope headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    id: MessageId,
    timestamp: Timestamp,
    #[serde(flatten)]
    entries: BTreeMap<String, HeaderValue>,
}

impl Headers {
    pub(crate) fn new(
        id: MessageId,
        timestamp: Timestamp,
        entries: BTreeMap<String, HeaderValue>,
    ) -> Self {
        Self {
            id,
            timestamp,
            entries,
        }
    }

    /// The envelope id.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Creation time in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Looks up a non-reserved header.
    ///
    /// Use [`Headers::id`] and [`Headers::timestamp`] for the reserved entries.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries.get(key)
    }

    /// Integer view of a header.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    /// String view of a header.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// True if the key is present (reserved keys are always present).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        is_reserved(key) || self.entries.contains_key(key)
    }

    /// Number of headers, counting the two reserved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + 2
    }

    /// Headers are never empty: `id` and `timestamp` always exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates the non-reserved headers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.entries.iter()
    }

    pub(crate) fn entries(&self) -> &BTreeMap<String, HeaderValue> {
        &self.entries
    }

    pub(crate) fn insert(&mut self, key: String, value: HeaderValue) {
        self.entries.insert(key, value);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        self.entries.remove(key)
    }
}
