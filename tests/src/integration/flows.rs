//! # Messaging Flows
//!
//! End-to-end paths a message takes through the bus:
//!
//! 1. **Queue → transactional poller**: failed handling restores the message
//!    and reports it to an error channel
//! 2. **Publish-subscribe fan-out**: sequence headers and ignored failures
//! 3. **Registry wiring**: adapters bound by channel name
//! 4. **History**: a message bridged across channels records each hop
//! 5. **Executor / rendezvous**: hand-off to worker tasks and blocked receivers

use super::{Collector, Rejecting};
use courier_bus::{
    Channel, ChannelRegistry, Channels, ErrorChannelHandler, MessageChannel, PollableChannel,
    RegistryError, SubscribableChannel, WorkerPool, WorkerPoolConfig,
};
use courier_endpoint::{
    FnConsumer, OutboundChannelAdapter, PeriodicTrigger, PollerSpec, PollingEndpoint,
    PseudoTransactionManager,
};
use courier_store::MessageStore;
use courier_types::{headers, ConsumerError, Envelope, MessageConsumer, MessageHistory};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOW: Option<Duration> = Some(Duration::ZERO);

fn fast_trigger() -> Arc<PeriodicTrigger> {
    Arc::new(PeriodicTrigger::fixed_delay(Duration::from_millis(2)))
}

/// Fails the first `failures` calls, then records envelopes.
struct Flaky {
    failures: AtomicUsize,
    inner: Arc<Collector>,
}

#[async_trait::async_trait]
impl MessageConsumer for Flaky {
    async fn accept(&self, envelope: Envelope) -> Result<(), ConsumerError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConsumerError::new("database unavailable"));
        }
        self.inner.accept(envelope).await
    }
}

// =============================================================================
// QUEUE → TRANSACTIONAL POLLER
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transactional_poller_redelivers_and_reports() {
    let orders = Channels::queue("orders").capacity(16).build_queue().unwrap();
    let errors = Channels::queue("errors").capacity(16).build_queue().unwrap();

    let collector = Collector::new();
    let consumer = Arc::new(Flaky {
        failures: AtomicUsize::new(2),
        inner: Arc::clone(&collector),
    });
    let tm = Arc::new(PseudoTransactionManager::new());
    let endpoint = PollingEndpoint::builder("order-poller", orders.clone(), consumer)
        .trigger(fast_trigger())
        .transaction_manager(tm.clone())
        .error_handler(Arc::new(ErrorChannelHandler::new(Channel::Queue(errors.clone()))))
        .build()
        .unwrap();

    let order = Envelope::new(json!({"order": 42}));
    orders.send(order.clone(), NOW).await.unwrap();
    endpoint.start().await.unwrap();

    collector.wait_for(1).await;
    endpoint.stop().await;

    // Delivered once after two rollbacks, always the same message.
    assert_eq!(collector.seen()[0].id(), order.id());
    assert_eq!(orders.queue_size().unwrap(), 0);
    assert_eq!(orders.store().size(orders.group()).unwrap(), 0);
    assert_eq!(tm.rolled_back(), 2);
    assert_eq!(tm.active(), 0);

    assert_eq!(errors.queue_size().unwrap(), 2);
    let report = errors.receive(NOW).await.unwrap().unwrap();
    assert_eq!(report.payload()["source"], json!("order-poller"));
    assert_eq!(
        report.headers().get_str(headers::ORIGINAL_MESSAGE_ID),
        Some(order.id().to_string().as_str())
    );
}

#[tokio::test]
async fn test_non_transactional_failure_drops_message() {
    let orders = Channels::queue("orders").capacity(16).build_queue().unwrap();
    orders.send(Envelope::new("a"), NOW).await.unwrap();
    orders.send(Envelope::new("b"), NOW).await.unwrap();

    let endpoint = PollingEndpoint::builder("poller", orders.clone(), Arc::new(Rejecting))
        .max_messages_per_poll(5)
        .build()
        .unwrap();

    // Each failure ends the poll, so two polls drain two messages.
    assert_eq!(endpoint.poll_once().await.failed, 1);
    assert_eq!(endpoint.poll_once().await.failed, 1);
    assert_eq!(endpoint.poll_once().await.received, 0);
    assert_eq!(endpoint.stats().failed, 2);
}

// =============================================================================
// PUBLISH-SUBSCRIBE FAN-OUT
// =============================================================================

#[tokio::test]
async fn test_publish_subscribe_sequences_and_ignores_failures() {
    let errors = Channels::queue("errors").capacity(8).build_queue().unwrap();
    let events = Channels::publish_subscribe("events")
        .apply_sequence(true)
        .error_handler(Arc::new(ErrorChannelHandler::new(Channel::Queue(errors.clone()))))
        .build_publish_subscribe()
        .unwrap();

    let first = Collector::new();
    let second = Collector::new();
    events.subscribe(first.clone());
    events.subscribe(Arc::new(Rejecting));
    events.subscribe(second.clone());

    events.send(Envelope::new("evt"), None).await.unwrap();

    let a = &first.seen()[0];
    let b = &second.seen()[0];
    assert_eq!(a.headers().get_i64(headers::SEQUENCE_SIZE), Some(3));
    assert_eq!(a.headers().get_i64(headers::SEQUENCE_NUMBER), Some(1));
    assert_eq!(b.headers().get_i64(headers::SEQUENCE_NUMBER), Some(3));
    assert_eq!(a.id(), b.id());

    assert_eq!(errors.queue_size().unwrap(), 1);
}

#[tokio::test]
async fn test_publish_subscribe_async_delivery() {
    let pool = WorkerPool::start(WorkerPoolConfig {
        name: "fanout".into(),
        ..WorkerPoolConfig::default()
    })
    .unwrap();
    let events = Channels::publish_subscribe("events")
        .executor(Arc::clone(&pool))
        .build()
        .unwrap();

    let collectors: Vec<_> = (0..4).map(|_| Collector::new()).collect();
    let subscribable = events.as_subscribable().unwrap();
    for c in &collectors {
        subscribable.subscribe(c.clone());
    }

    for i in 0..10 {
        events.send(Envelope::new(i), None).await.unwrap();
    }
    for c in &collectors {
        c.wait_for(10).await;
    }
    pool.shutdown().await;
}

// =============================================================================
// REGISTRY WIRING
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_adapters_bound_through_registry() {
    let registry = ChannelRegistry::new();
    registry.register(Channels::direct("commands").build().unwrap()).unwrap();
    registry.register(Channels::queue("jobs").capacity(32).build().unwrap()).unwrap();
    registry.register(Channels::rendezvous("handoff").build().unwrap()).unwrap();
    assert_eq!(registry.names(), vec!["commands", "handoff", "jobs"]);

    assert!(matches!(
        registry.register(Channels::queue("jobs").build().unwrap()),
        Err(RegistryError::Duplicate(_))
    ));
    assert!(matches!(
        registry.subscribable("jobs"),
        Err(RegistryError::WrongKind { .. })
    ));

    let commands = Collector::new();
    let jobs = Collector::new();
    let command_binding = OutboundChannelAdapter::new("command-handler", commands.clone())
        .bind(&registry.get("commands").unwrap())
        .await
        .unwrap();
    let job_binding = OutboundChannelAdapter::new("job-worker", jobs.clone())
        .with_poller(PollerSpec::new().trigger(fast_trigger()).max_messages_per_poll(8))
        .bind(&registry.get("jobs").unwrap())
        .await
        .unwrap();

    let command_channel = registry.get("commands").unwrap();
    let job_channel = registry.get("jobs").unwrap();
    command_channel.send(Envelope::new("restart"), None).await.unwrap();
    for i in 0..20 {
        job_channel.send(Envelope::new(i), NOW).await.unwrap();
    }

    jobs.wait_for(20).await;
    assert_eq!(commands.len(), 1);

    command_binding.unbind().await;
    job_binding.unbind().await;
    assert!(registry.remove("jobs").is_some());
    assert!(matches!(registry.get("jobs"), Err(RegistryError::NotFound(_))));
}

// =============================================================================
// HISTORY
// =============================================================================

#[tokio::test]
async fn test_history_records_each_hop() {
    let inbound = Channels::direct("inbound").track_history(true).build_direct().unwrap();
    let outbound = Channels::queue("outbound")
        .capacity(4)
        .track_history(true)
        .build_queue()
        .unwrap();

    let bridge_target = Arc::clone(&outbound);
    inbound.subscribe(Arc::new(FnConsumer::new("bridge", move |envelope: Envelope| {
        let target = Arc::clone(&bridge_target);
        async move {
            target
                .send(envelope, NOW)
                .await
                .map_err(|e| ConsumerError::with_source("bridge send failed", e))
        }
    })));

    inbound.send(Envelope::new("ping"), None).await.unwrap();
    let received = outbound.receive(NOW).await.unwrap().unwrap();

    let history = MessageHistory::read(&received);
    let names: Vec<&str> = history.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["inbound", "outbound"]);
    assert!(history.entries().iter().all(|e| e.component_type == "channel"));
}

// =============================================================================
// EXECUTOR / RENDEZVOUS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_executor_channel_round_robin() {
    let pool = WorkerPool::start(WorkerPoolConfig {
        name: "exec".into(),
        workers: 2,
        ..WorkerPoolConfig::default()
    })
    .unwrap();
    let channel = Channels::executor("work", Arc::clone(&pool)).build_executor().unwrap();

    let left = Collector::new();
    let right = Collector::new();
    channel.subscribe(left.clone());
    channel.subscribe(right.clone());

    for i in 0..10 {
        channel.send(Envelope::new(i), None).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while left.len() + right.len() < 10 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!((left.len(), right.len()), (5, 5));
    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rendezvous_sender_waits_for_poller() {
    let handoff = Channels::rendezvous("handoff").build_rendezvous().unwrap();
    let collector = Collector::new();
    let endpoint = PollingEndpoint::builder("taker", handoff.clone(), collector.clone())
        .trigger(fast_trigger())
        .receive_timeout(Some(Duration::from_millis(20)))
        .build()
        .unwrap();

    // No receiver yet: a non-blocking send finds nobody.
    assert!(handoff.send(Envelope::new("early"), NOW).await.is_err());

    endpoint.start().await.unwrap();
    handoff
        .send(Envelope::new("late"), Some(Duration::from_secs(2)))
        .await
        .unwrap();
    collector.wait_for(1).await;
    endpoint.stop().await;

    assert_eq!(collector.seen()[0].payload(), &json!("late"));
    assert_eq!(handoff.waiting_senders(), 0);
}
