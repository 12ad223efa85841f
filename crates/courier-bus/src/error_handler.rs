//! # Error Handlers
//!
//! Collaborators that receive failures which cannot be returned to a caller:
//! asynchronous dispatch failures, ignored publish-subscribe failures, and
//! polling endpoint cycle failures.

use crate::channel::Channel;
use async_trait::async_trait;
use courier_types::{headers, Envelope};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A failure reported out of band.
#[derive(Debug, Clone)]
pub struct DeliveryErrorEvent {
    /// Channel or endpoint that observed the failure.
    pub component: String,
    /// The envelope being handled, when one was involved.
    pub envelope: Option<Envelope>,
    pub error: Arc<dyn Error + Send + Sync>,
    /// True when the envelope was restored to its channel.
    pub rolled_back: bool,
}

impl DeliveryErrorEvent {
    pub fn new(
        component: impl Into<String>,
        envelope: Option<Envelope>,
        error: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            component: component.into(),
            envelope,
            error: Arc::new(error),
            rolled_back: false,
        }
    }

    #[must_use]
    pub fn rolled_back(mut self, rolled_back: bool) -> Self {
        self.rolled_back = rolled_back;
        self
    }
}

#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, event: DeliveryErrorEvent);
}

/// Default handler: logs the failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
    async fn handle_error(&self, event: DeliveryErrorEvent) {
        match &event.envelope {
            Some(envelope) => error!(
                component = %event.component,
                message_id = %envelope.id(),
                rolled_back = event.rolled_back,
                error = %event.error,
                "Message handling failed"
            ),
            None => error!(
                component = %event.component,
                error = %event.error,
                "Message handling failed"
            ),
        }
    }
}

/// Sends an error envelope to a channel, non-blocking.
///
/// Payload: `{"error": <text>, "failedMessageId": <id|null>, "source": <component>}`,
/// with the `originalMessageId` header set when an envelope was involved.
#[derive(Debug, Clone)]
pub struct ErrorChannelHandler {
    channel: Channel,
}

impl ErrorChannelHandler {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Builds the envelope sent for an event.
    #[must_use]
    pub fn to_envelope(event: &DeliveryErrorEvent) -> Envelope {
        let failed_id = event.envelope.as_ref().map(|e| e.id().to_string());
        let envelope = Envelope::new(json!({
            "error": event.error.to_string(),
            "failedMessageId": failed_id,
            "source": event.component,
        }));
        match failed_id {
            Some(id) => envelope.with_header(headers::ORIGINAL_MESSAGE_ID, id),
            None => envelope,
        }
    }
}

#[async_trait]
impl ErrorHandler for ErrorChannelHandler {
    async fn handle_error(&self, event: DeliveryErrorEvent) {
        let envelope = Self::to_envelope(&event);
        match self.channel.send(envelope, Some(Duration::ZERO)).await {
            Ok(()) => debug!(
                component = %event.component,
                error_channel = self.channel.name(),
                "Error forwarded to error channel"
            ),
            Err(e) => warn!(
                component = %event.component,
                error_channel = self.channel.name(),
                error = %e,
                original_error = %event.error,
                "Could not forward error to error channel"
            ),
        }
    }
}

/// Shared handle used in component configuration.
pub type SharedErrorHandler = Arc<dyn ErrorHandler>;

/// The handler used when none is configured.
#[must_use]
pub fn default_error_handler() -> SharedErrorHandler {
    Arc::new(LoggingErrorHandler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Channels;
    use crate::channel::PollableChannel;
    use courier_types::ConsumerError;

    #[tokio::test]
    async fn test_error_channel_receives_error_envelope() {
        let errors = Channels::queue("errors").capacity(4).build_queue().unwrap();
        let handler = ErrorChannelHandler::new(Channel::Queue(Arc::clone(&errors)));

        let failed = Envelope::new("order-1");
        handler
            .handle_error(DeliveryErrorEvent::new(
                "orders",
                Some(failed.clone()),
                ConsumerError::new("declined"),
            ))
            .await;

        let received = errors.receive(Some(Duration::ZERO)).await.unwrap().unwrap();
        assert_eq!(received.payload()["error"], json!("declined"));
        assert_eq!(received.payload()["source"], json!("orders"));
        assert_eq!(
            received.payload()["failedMessageId"],
            json!(failed.id().to_string())
        );
        assert_eq!(
            received.headers().get_str(headers::ORIGINAL_MESSAGE_ID),
            Some(failed.id().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_full_error_channel_is_not_propagated() {
        let errors = Channels::queue("errors").capacity(1).build_queue().unwrap();
        let handler = ErrorChannelHandler::new(Channel::Queue(Arc::clone(&errors)));

        for _ in 0..3 {
            handler
                .handle_error(DeliveryErrorEvent::new(
                    "orders",
                    None,
                    ConsumerError::new("x"),
                ))
                .await;
        }
        assert_eq!(errors.queue_size().unwrap(), 1);
        let received = errors.receive(Some(Duration::ZERO)).await.unwrap().unwrap();
        assert!(received.payload()["failedMessageId"].is_null());
        assert!(!received.headers().contains_key(headers::ORIGINAL_MESSAGE_ID));
    }
}
