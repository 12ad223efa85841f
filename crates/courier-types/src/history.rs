//! Message history: the ordered list of components an envelope passed
//! through, stored in the `history` header.

use crate::envelope::Envelope;
use crate::headers::HISTORY;
use crate::{now_millis, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One component visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub timestamp: Timestamp,
}

/// Read-only view over the `history` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHistory {
    entries: Vec<HistoryEntry>,
}

impl MessageHistory {
    /// Parses the history carried by an envelope. Missing or malformed
    /// history reads as empty.
    #[must_use]
    pub fn read(envelope: &Envelope) -> Self {
        let entries = envelope
            .header(HISTORY)
            .and_then(|v| serde_json::from_value::<Vec<HistoryEntry>>(v.clone()).ok())
            .unwrap_or_default();
        Self { entries }
    }

    /// Returns a copy of `envelope` with one more history entry.
    #[must_use]
    pub fn append(envelope: &Envelope, name: &str, component_type: &str) -> Envelope {
        let mut history = Self::read(envelope);
        history.entries.push(HistoryEntry {
            name: name.to_string(),
            component_type: component_type.to_string(),
            timestamp: now_millis(),
        });

        match serde_json::to_value(&history.entries) {
            Ok(value) => envelope.with_header(HISTORY, value),
            Err(e) => {
                warn!(message_id = %envelope.id(), error = %e, "Failed to encode message history");
                envelope.clone()
            }
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first visit to `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}
