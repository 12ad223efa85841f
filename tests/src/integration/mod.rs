//! Shared fixtures for the integration flows.

mod concurrency;
mod flows;

use async_trait::async_trait;
use courier_telemetry::{init_logging, TelemetryConfig};
use courier_types::{ConsumerError, Envelope, MessageConsumer};
use parking_lot::Mutex;
use std::sync::{Arc, Once};
use std::time::Duration;

static LOGGING: Once = Once::new();

/// Installs the courier subscriber once per test binary.
///
/// Quiet by default; `COURIER_LOG_LEVEL=debug` shows channel and endpoint events.
pub(crate) fn init_test_logging() {
    LOGGING.call_once(|| {
        let config = TelemetryConfig::from_lookup(|key| match key {
            "COURIER_LOG_LEVEL" => Some(std::env::var(key).unwrap_or_else(|_| "warn".to_string())),
            "COURIER_SERVICE_NAME" => Some("courier-tests".to_string()),
            "COURIER_JSON_LOGS" => Some("false".to_string()),
            _ => std::env::var(key).ok(),
        });
        init_logging(&config).expect("test logging");
    });
}

/// Records every envelope it accepts.
#[derive(Default)]
pub(crate) struct Collector {
    seen: Mutex<Vec<Envelope>>,
}

impl Collector {
    pub(crate) fn new() -> Arc<Self> {
        init_test_logging();
        Arc::new(Self::default())
    }

    pub(crate) fn seen(&self) -> Vec<Envelope> {
        self.seen.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Waits until at least `count` envelopes arrived.
    pub(crate) async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("consumer did not receive enough messages in time");
    }
}

#[async_trait]
impl MessageConsumer for Collector {
    async fn accept(&self, envelope: Envelope) -> Result<(), ConsumerError> {
        self.seen.lock().push(envelope);
        Ok(())
    }
}

#[test]
fn test_logging_fixture_installs_subscriber() {
    init_test_logging();
    assert!(tracing::dispatcher::has_been_set());
    // Later calls are no-ops.
    init_test_logging();
}

/// Rejects every envelope.
pub(crate) struct Rejecting;

#[async_trait]
impl MessageConsumer for Rejecting {
    async fn accept(&self, _envelope: Envelope) -> Result<(), ConsumerError> {
        Err(ConsumerError::new("rejected"))
    }
}
