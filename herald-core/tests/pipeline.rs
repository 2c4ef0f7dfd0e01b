mod support;

use std::sync::Arc;
use std::time::Duration;

use herald_core::cache::{AuditCache, InMemoryAuditCache};
use herald_core::model::{MessageStatus, NewMessage, Outbound};
use herald_core::orchestration::{
    Consumer, DeliveryOutcome, MESSAGE_SENDER_TOPIC, MessageBus, MessageConsumer,
    MessageProducer, ProducerConfig, Scheduler,
};
use herald_core::store::{DEFAULT_LEASE, InMemoryMessageStore, MessageStore};
use tokio_util::sync::CancellationToken;

use support::{
    AlwaysAccept, BrokenCache, FailThenAccept, Gated, eventually, fast_retry,
};

async fn seed_claimed(store: &InMemoryMessageStore, count: usize) -> Vec<Outbound> {
    for i in 0..count {
        store
            .insert(NewMessage::pending(format!("+90555000{i:04}"), format!("msg {i}")))
            .await
            .expect("insert");
    }
    store
        .claim(count as i64, DEFAULT_LEASE)
        .await
        .expect("claim")
        .into_iter()
        .map(|row| Outbound::try_from(row).expect("valid"))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_in_flight_deliveries() {
    const WORKERS: usize = 2;

    let store = Arc::new(InMemoryMessageStore::new());
    let notifier = Arc::new(Gated::new());
    let bus = Arc::new(MessageBus::new());
    bus.register_channel(MESSAGE_SENDER_TOPIC, 8);
    let topic = bus.get_channel(MESSAGE_SENDER_TOPIC).expect("topic");

    for outbound in seed_claimed(&store, WORKERS + 1).await {
        topic.try_publish(outbound).expect("slot free");
    }

    let consumer = MessageConsumer::new(
        store.clone(),
        notifier.clone(),
        Arc::new(InMemoryAuditCache::new()),
        fast_retry(5),
    );
    let shutdown = CancellationToken::new();
    let pool = tokio::spawn({
        let bus = Arc::clone(&bus);
        let shutdown = shutdown.clone();
        async move { consumer.consume(bus, WORKERS, shutdown).await }
    });

    assert!(
        eventually(Duration::from_secs(2), || async {
            notifier.in_flight() == WORKERS
        })
        .await
    );
    // give an extra worker, if there were one, time to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(notifier.in_flight(), WORKERS);
    assert_eq!(topic.queued(), 1, "third message must wait for a free worker");

    notifier.release(1);
    assert!(
        eventually(Duration::from_secs(2), || async { topic.queued() == 0 })
            .await
    );
    notifier.release(WORKERS);

    let done = eventually(Duration::from_secs(2), || async {
        store
            .list_sent(Default::default())
            .await
            .map(|rows| rows.len() == WORKERS + 1)
            .unwrap_or(false)
    })
    .await;
    assert!(done, "every message should end up sent");
    assert_eq!(notifier.peak(), WORKERS);

    shutdown.cancel();
    pool.await.expect("join").expect("consumer");
}

#[tokio::test]
async fn full_topic_blocks_publish_until_a_slot_frees() {
    const CAPACITY: usize = 2;

    let store = Arc::new(InMemoryMessageStore::new());
    for i in 0..=CAPACITY {
        store
            .insert(NewMessage::pending(format!("+90555{i:07}"), "hello"))
            .await
            .expect("insert");
    }

    let bus = MessageBus::new();
    bus.register_channel(MESSAGE_SENDER_TOPIC, CAPACITY);
    let topic = bus.get_channel(MESSAGE_SENDER_TOPIC).expect("topic");

    let producer = MessageProducer::new(
        store.clone(),
        Default::default(),
        ProducerConfig {
            claim_batch_size: 10,
            ..ProducerConfig::default()
        },
    );
    let shutdown = CancellationToken::new();
    let tick = tokio::spawn({
        let topic = topic.clone();
        let shutdown = shutdown.clone();
        async move { producer.claim_and_publish(&topic, &shutdown).await }
    });

    assert!(
        eventually(Duration::from_secs(2), || async {
            topic.queued() == CAPACITY
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!tick.is_finished(), "publish of the extra row must block");

    let first = topic.recv().await.expect("message");
    let report = tokio::time::timeout(Duration::from_secs(2), tick)
        .await
        .expect("publish resumes once a slot frees")
        .expect("join")
        .expect("tick");

    assert_eq!(report.claimed, CAPACITY + 1);
    assert_eq!(report.published, CAPACITY + 1);
    assert_eq!(topic.queued(), CAPACITY);
    assert_ne!(first.id(), topic.recv().await.expect("message").id());
}

#[tokio::test]
async fn blocked_publish_gives_way_to_shutdown() {
    let store = Arc::new(InMemoryMessageStore::new());
    for i in 0..3 {
        store
            .insert(NewMessage::pending(format!("r{i}"), "c"))
            .await
            .expect("insert");
    }
    let bus = MessageBus::new();
    bus.register_channel(MESSAGE_SENDER_TOPIC, 1);
    let topic = bus.get_channel(MESSAGE_SENDER_TOPIC).expect("topic");

    let producer = MessageProducer::new(
        store.clone(),
        Default::default(),
        ProducerConfig::default(),
    );
    let shutdown = CancellationToken::new();
    let tick = tokio::spawn({
        let topic = topic.clone();
        let shutdown = shutdown.clone();
        async move { producer.claim_and_publish(&topic, &shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), tick)
        .await
        .expect("cancel unblocks publish")
        .expect("join");
    assert!(result.is_err());
}

#[tokio::test]
async fn transient_failures_are_retried_through_the_consumer() {
    let store = Arc::new(InMemoryMessageStore::new());
    let cache = Arc::new(InMemoryAuditCache::new());
    let notifier = Arc::new(FailThenAccept::new(3));
    let consumer = MessageConsumer::new(
        store.clone(),
        notifier.clone(),
        cache.clone(),
        fast_retry(5),
    );

    let outbound = seed_claimed(&store, 1).await.remove(0);
    consumer
        .process(0, outbound.clone(), &CancellationToken::new())
        .await;

    assert_eq!(notifier.calls(), 4);
    let row = store.get(outbound.id()).await.expect("get").expect("row");
    assert_eq!(row.status, MessageStatus::Sent);
    assert!(cache.sent_at("ext-4").await.expect("read").is_some());
}

#[tokio::test]
async fn audit_write_failure_does_not_revert_sent() {
    let store = Arc::new(InMemoryMessageStore::new());
    let cache = Arc::new(BrokenCache::default());
    let notifier = Arc::new(AlwaysAccept::default());
    let consumer = MessageConsumer::new(
        store.clone(),
        notifier.clone(),
        cache.clone(),
        fast_retry(5),
    );

    let outbound = seed_claimed(&store, 1).await.remove(0);
    let outcome = consumer
        .process(0, outbound.clone(), &CancellationToken::new())
        .await;

    assert_eq!(outcome, DeliveryOutcome::Sent);
    assert_eq!(notifier.calls(), 1);
    assert_eq!(cache.writes(), 1);
    let row = store.get(outbound.id()).await.expect("get").expect("row");
    assert_eq!(row.status, MessageStatus::Sent);
}

#[tokio::test]
async fn exhausted_retries_mark_the_row_failed() {
    let store = Arc::new(InMemoryMessageStore::new());
    let notifier = Arc::new(FailThenAccept::always_failing());
    let consumer = MessageConsumer::new(
        store.clone(),
        notifier.clone(),
        Arc::new(InMemoryAuditCache::new()),
        fast_retry(5),
    );

    let outbound = seed_claimed(&store, 1).await.remove(0);
    consumer
        .process(0, outbound.clone(), &CancellationToken::new())
        .await;

    assert_eq!(notifier.calls(), 5);
    let row = store.get(outbound.id()).await.expect("get").expect("row");
    assert_eq!(row.status, MessageStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_rows_flow_through_to_sent() {
    let store = Arc::new(InMemoryMessageStore::new());
    let cache = Arc::new(InMemoryAuditCache::new());
    let notifier = Arc::new(AlwaysAccept::default());
    let mut ids = Vec::new();
    for recipient in ["+905551111111", "+905552222222"] {
        let row = store
            .insert(NewMessage::pending(recipient, "hello"))
            .await
            .expect("insert");
        ids.push(row.id);
    }

    let mut scheduler = Scheduler::new();
    scheduler.add_producer(
        MessageProducer::new(
            store.clone(),
            scheduler.switch(),
            ProducerConfig {
                interval_ms: 1_000,
                claim_batch_size: 2,
                ..ProducerConfig::default()
            },
        ),
    );
    scheduler.add_consumer(MessageConsumer::new(
        store.clone(),
        notifier.clone(),
        cache.clone(),
        fast_retry(5),
    ));

    let watcher = {
        let store = Arc::clone(&store);
        let ids = ids.clone();
        async move {
            eventually(Duration::from_secs(3), || async {
                let mut all_sent = true;
                for id in &ids {
                    let row = store.get(*id).await.ok().flatten();
                    all_sent &= row.is_some_and(|row| {
                        row.status == MessageStatus::Sent
                    });
                }
                all_sent
            })
            .await;
        }
    };

    tokio::time::timeout(Duration::from_secs(5), scheduler.run_until(watcher, 2))
        .await
        .expect("scheduler stops")
        .expect("clean run");

    for id in ids {
        let row = store.get(id).await.expect("get").expect("row");
        assert_eq!(row.status, MessageStatus::Sent, "message {id}");
    }
    let receipts = notifier.receipts().await;
    assert_eq!(receipts.len(), 2);
    for external_id in receipts {
        assert!(
            cache.sent_at(&external_id).await.expect("read").is_some(),
            "audit entry for {external_id}"
        );
    }
}
