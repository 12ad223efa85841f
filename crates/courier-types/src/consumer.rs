//! # Consumer Capability
//!
//! The single contract every channel dispatches to. Transport adapters,
//! method-invoking adapters and test doubles are separate types behind this
//! trait, chosen at wiring time.

use crate::envelope::Envelope;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Failure raised by a consumer while handling an envelope.
///
/// Cheap to clone: the optional cause is shared.
#[derive(Debug, Clone)]
pub struct ConsumerError {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ConsumerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error as the cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => write!(f, "{}", self.message),
        }
    }
}

impl StdError for ConsumerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

/// Accepts envelopes; may fail.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Handles one envelope.
    async fn accept(&self, envelope: Envelope) -> Result<(), ConsumerError>;

    /// Name used in logs and error reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
