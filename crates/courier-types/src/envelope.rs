//! # Envelope
//!
//! The immutable unit moved through every channel.
//!
//! - Payload and headers sit behind `Arc`, so clones are cheap and every
//!   holder sees the same frozen data.
//! - Header updates (`with_header`, `without_header`) build a new header map
//!   and share the payload; the original envelope is never touched.
//! - The `id` header is assigned once, at creation.

use crate::headers::{self, HeaderValue, Headers};
use crate::{now_millis, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Unique envelope identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Immutable payload + headers.
///
/// Equality compares payload and every header, including `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    headers: Arc<Headers>,
    payload: Arc<Value>,
}

impl Envelope {
    /// Creates an envelope with no extra headers.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self::create(payload, std::iter::empty::<(String, HeaderValue)>())
    }

    /// Creates an envelope from a payload and a header mapping.
    ///
    /// A parseable `id` header is kept (an envelope rehydrated from an
    /// external store keeps its identity); otherwise a fresh id is assigned.
    /// A `timestamp` header is kept if it is an unsigned integer.
    pub fn create<K, I>(payload: impl Into<Value>, headers: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, HeaderValue)>,
    {
        let mut id = None;
        let mut timestamp = None;
        let mut entries = BTreeMap::new();

        for (key, value) in headers {
            let key = key.into();
            match key.as_str() {
                headers::ID => {
                    id = value.as_str().and_then(|s| s.parse::<MessageId>().ok());
                }
                headers::TIMESTAMP => timestamp = value.as_u64(),
                _ => {
                    entries.insert(key, value);
                }
            }
        }

        Self {
            headers: Arc::new(Headers::new(
                id.unwrap_or_default(),
                timestamp.unwrap_or_else(now_millis),
                entries,
            )),
            payload: Arc::new(payload.into()),
        }
    }

    /// Starts a fluent builder.
    pub fn builder(payload: impl Into<Value>) -> EnvelopeBuilder {
        EnvelopeBuilder::new(payload)
    }

    /// The unique id, never reassigned.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.headers.id()
    }

    /// Creation time in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.headers.timestamp()
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Shorthand for `headers().get(key)`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    /// Priority header, `0` when absent or not an integer.
    #[must_use]
    pub fn priority(&self) -> i64 {
        self.headers.get_i64(headers::PRIORITY).unwrap_or(0)
    }

    /// Returns a copy carrying `key = value`; `self` is unchanged.
    ///
    /// Reserved keys (`id`, `timestamp`) are read-only: the copy is returned
    /// with the original values.
    #[must_use]
    pub fn with_header(&self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let key = key.into();
        if headers::is_reserved(&key) {
            debug!(message_id = %self.id(), key = %key, "Ignoring write to reserved header");
            return self.clone();
        }

        let mut headers = Headers::clone(&self.headers);
        headers.insert(key, value.into());
        Self {
            headers: Arc::new(headers),
            payload: Arc::clone(&self.payload),
        }
    }

    /// Returns a copy without `key`; reserved keys cannot be removed.
    #[must_use]
    pub fn without_header(&self, key: &str) -> Self {
        if headers::is_reserved(key) || self.headers.get(key).is_none() {
            return self.clone();
        }

        let mut headers = Headers::clone(&self.headers);
        headers.remove(key);
        Self {
            headers: Arc::new(headers),
            payload: Arc::clone(&self.payload),
        }
    }

    /// A new envelope (fresh id and timestamp) with a different payload and
    /// the same non-reserved headers.
    #[must_use]
    pub fn with_payload(&self, payload: impl Into<Value>) -> Self {
        let entries = self
            .headers
            .entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()));
        Self::create(payload, entries)
    }

    /// True if both handles share the same header and payload allocations.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.headers, &other.headers) && Arc::ptr_eq(&self.payload, &other.payload)
    }
}

/// Fluent envelope construction.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    payload: Value,
    headers: BTreeMap<String, HeaderValue>,
}

impl EnvelopeBuilder {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn priority(self, priority: i64) -> Self {
        self.header(headers::PRIORITY, priority)
    }

    #[must_use]
    pub fn build(self) -> Envelope {
        Envelope::create(self.payload, self.headers)
    }
}
