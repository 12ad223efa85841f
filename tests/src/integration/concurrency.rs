//! # Concurrency
//!
//! Many producers and consumers sharing one channel. Every message must be
//! delivered exactly once and no capacity bound may be exceeded.

use super::Collector;
use courier_bus::{Channels, MessageChannel, PollableChannel, QueueChannel};
use courier_endpoint::{PeriodicTrigger, PollingEndpoint, PseudoTransactionManager};
use courier_types::{headers, Envelope};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 50;

fn payload_index(envelope: &Envelope) -> u64 {
    envelope.payload().as_u64().unwrap_or(u64::MAX)
}

async fn produce(queue: Arc<QueueChannel>) {
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        producers.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                let n = (p * PER_PRODUCER + i) as u64;
                queue.send(Envelope::new(n), None).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
}

// =============================================================================
// BOUNDED QUEUE
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_queue_many_pollers_exactly_once() {
    let queue = Channels::queue("work").capacity(10).build_queue().unwrap();
    let collector = Collector::new();

    let mut endpoints = Vec::new();
    for i in 0..3 {
        let endpoint = PollingEndpoint::builder(format!("worker-{i}"), queue.clone(), collector.clone())
            .trigger(Arc::new(PeriodicTrigger::fixed_delay(Duration::from_millis(1))))
            .max_messages_per_poll(4)
            .build()
            .unwrap();
        endpoint.start().await.unwrap();
        endpoints.push(endpoint);
    }

    // Producers block on the full queue until pollers make room.
    tokio::time::timeout(Duration::from_secs(10), produce(queue.clone()))
        .await
        .unwrap();
    collector.wait_for(PRODUCERS * PER_PRODUCER).await;
    for endpoint in &endpoints {
        endpoint.stop().await;
    }

    let seen = collector.seen();
    let unique: HashSet<u64> = seen.iter().map(payload_index).collect();
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(queue.queue_size().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transactional_pollers_release_every_hold() {
    let queue = Channels::queue("work").capacity(5).build_queue().unwrap();
    let collector = Collector::new();
    let tm = Arc::new(PseudoTransactionManager::new());

    let mut endpoints = Vec::new();
    for i in 0..2 {
        let endpoint = PollingEndpoint::builder(format!("tx-worker-{i}"), queue.clone(), collector.clone())
            .trigger(Arc::new(PeriodicTrigger::fixed_delay(Duration::from_millis(1))))
            .transaction_manager(tm.clone())
            .build()
            .unwrap();
        endpoint.start().await.unwrap();
        endpoints.push(endpoint);
    }

    tokio::time::timeout(Duration::from_secs(10), produce(queue.clone()))
        .await
        .unwrap();
    collector.wait_for(PRODUCERS * PER_PRODUCER).await;
    for endpoint in &endpoints {
        endpoint.stop().await;
    }

    assert_eq!(collector.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(queue.in_flight(), 0);
    assert_eq!(queue.remaining_capacity().unwrap(), Some(5));
    assert_eq!(tm.committed() as usize, PRODUCERS * PER_PRODUCER);
    assert_eq!(tm.active(), 0);
}

// =============================================================================
// PRIORITY
// =============================================================================

#[tokio::test]
async fn test_priority_drain_order_under_random_load() {
    let queue = Channels::priority("ranked").capacity(200).build_queue().unwrap();

    let priorities: Vec<i64> = {
        let mut rng = rand::thread_rng();
        (0..200).map(|_| rng.gen_range(-5..=5)).collect()
    };
    for (i, p) in priorities.iter().enumerate() {
        let envelope = Envelope::builder(i as u64).priority(*p).build();
        queue.send(envelope, Some(Duration::ZERO)).await.unwrap();
    }

    let mut drained = Vec::new();
    while let Some(envelope) = queue.receive(Some(Duration::ZERO)).await.unwrap() {
        drained.push(envelope);
    }
    assert_eq!(drained.len(), 200);

    for pair in drained.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.priority() >= b.priority());
        // Equal priorities keep arrival order.
        if a.priority() == b.priority() {
            assert!(payload_index(a) < payload_index(b));
        }
    }
    assert!(drained[0].headers().contains_key(headers::PRIORITY));
}

// =============================================================================
// RENDEZVOUS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rendezvous_pairs_each_sender_once() {
    let channel = Channels::rendezvous("pairs").build_rendezvous().unwrap();
    const PAIRS: u64 = 40;

    let mut receivers = Vec::new();
    for _ in 0..PAIRS {
        let channel = Arc::clone(&channel);
        receivers.push(tokio::spawn(async move {
            channel
                .receive(Some(Duration::from_secs(5)))
                .await
                .unwrap()
                .map(|e| payload_index(&e))
        }));
    }
    let mut senders = Vec::new();
    for n in 0..PAIRS {
        let channel = Arc::clone(&channel);
        senders.push(tokio::spawn(async move {
            channel
                .send(Envelope::new(n), Some(Duration::from_secs(5)))
                .await
                .unwrap();
        }));
    }

    for sender in senders {
        sender.await.unwrap();
    }
    let mut received = HashSet::new();
    for receiver in receivers {
        assert!(received.insert(receiver.await.unwrap().unwrap()));
    }
    assert_eq!(received.len() as u64, PAIRS);
    assert_eq!(channel.waiting_receivers(), 0);
    assert_eq!(channel.waiting_senders(), 0);
}
