mod common;

use common::*;
use moderation_queue::constants::{ItemOutcome, QueueStatus, QueueType};
use moderation_queue::queue::FailureDisposition;
use moderation_queue::state_machine::{ContentStatus, PrivateMessageStatus, TopicStatus};
use moderation_queue::worker::{Evaluation, WorkOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[tokio::test]
async fn test_worker_finalizes_claimed_item() {
    let queue = setup_test_queue().await;
    let (topic, item) = submit_topic(&queue, "screen me", None).await;
    let screener = Arc::new(MockScreener::approving());
    let worker = queue
        .worker(QueueType::TopicCreation, None, screener.clone())
        .with_worker_id("worker-under-test");

    let outcome = worker.process_next().await.unwrap().expect("an item to work on");
    let WorkOutcome::Finalized(result) = outcome else {
        panic!("approval should finalize");
    };
    assert_eq!(result.item.id, item.id);
    assert_eq!(result.item.assigned_worker.as_deref(), Some("worker-under-test"));
    assert_eq!(result.content.id, topic.id);
    assert_eq!(result.content.status, ContentStatus::Topic(TopicStatus::Approved));
    assert_eq!(screener.call_count(), 1);

    assert!(worker.process_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_worker_respects_partition_pin() {
    let queue = setup_test_queue().await;
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (_, with_bob) = submit_message(&queue, alice, bob, "hello bob").await;
    let (_, with_carol) = submit_message(&queue, alice, carol, "hello carol").await;

    let worker = queue.worker(
        QueueType::PrivateMessage,
        Some(with_carol.partition_key.clone()),
        Arc::new(MockScreener::returning(Evaluation::rejected("harassment"))),
    );

    let outcome = worker.process_next().await.unwrap().unwrap();
    let WorkOutcome::Finalized(result) = outcome else {
        panic!("rejection should finalize");
    };
    assert_eq!(result.item.id, with_carol.id);
    assert_eq!(
        result.content.status,
        ContentStatus::PrivateMessage(PrivateMessageStatus::Rejected)
    );
    assert!(worker.process_next().await.unwrap().is_none());

    let untouched = queue.store.get(with_bob.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, QueueStatus::Pending);
}

#[tokio::test]
async fn test_unavailable_screener_schedules_retry() {
    let queue = setup_test_queue().await;
    let (_, item) = submit_topic(&queue, "backend down", None).await;
    let worker = queue.worker(
        QueueType::TopicCreation,
        None,
        Arc::new(MockScreener::unavailable()),
    );

    let outcome = worker.process_next().await.unwrap().unwrap();
    let WorkOutcome::Failed(FailureDisposition::Retrying { item: retrying, .. }) = outcome else {
        panic!("an unavailable screener should schedule a retry");
    };
    assert_eq!(retrying.id, item.id);
    assert_eq!(retrying.attempts, 1);
    assert!(retrying
        .last_error
        .as_deref()
        .is_some_and(|error| error.contains("classifier offline")));
}

#[tokio::test]
async fn test_slow_screener_times_out() {
    let queue = setup_test_queue().await;
    submit_topic(&queue, "takes forever", None).await;
    let worker = queue.worker(
        QueueType::TopicCreation,
        None,
        Arc::new(MockScreener::slow(Duration::from_secs(5))),
    );

    let outcome = worker.process_next().await.unwrap().unwrap();
    let WorkOutcome::Failed(disposition) = outcome else {
        panic!("a timed out screening should not finalize");
    };
    assert!(disposition
        .item()
        .last_error
        .as_deref()
        .is_some_and(|error| error.contains("timed out")));
}

#[tokio::test]
async fn test_worker_loop_drains_queue_until_shutdown() {
    let queue = setup_test_queue().await;
    let (topic, _) = submit_topic(&queue, "host", None).await;
    for n in 0..3 {
        submit_post(&queue, topic.id, &format!("reply {n}"), None).await;
    }

    let screener = Arc::new(MockScreener::approving());
    let worker = queue.worker(QueueType::TosScreening, None, screener.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while screener.call_count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker should screen every post");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop")
        .unwrap();

    let overview = queue.coordinator.overview().await.unwrap();
    assert_eq!(overview.for_queue(QueueType::TosScreening).unwrap().pending_count, 0);
    assert_eq!(overview.for_queue(QueueType::PostModeration).unwrap().pending_count, 3);
}

#[tokio::test]
async fn test_worker_renews_lease_while_screening() {
    let queue = setup_test_queue().await;
    let (_, item) = submit_topic(&queue, "slow but steady", None).await;
    let worker = queue
        .worker(
            QueueType::TopicCreation,
            None,
            Arc::new(MockScreener::approving_after(Duration::from_millis(400))),
        )
        .with_worker_id("steady-worker")
        .with_heartbeat_interval(Duration::from_millis(50));

    let handle = tokio::spawn(async move { worker.process_next().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Without heartbeats the lease would be 300ms old by now
    let recovered = queue
        .store
        .requeue_stale(Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(recovered, 0);

    let outcome = handle.await.unwrap().unwrap().unwrap();
    let WorkOutcome::Finalized(result) = outcome else {
        panic!("a screening that keeps its lease should finalize");
    };
    assert_eq!(result.item.id, item.id);
    assert_eq!(result.item.assigned_worker.as_deref(), Some("steady-worker"));
}

#[tokio::test]
async fn test_missing_content_goes_straight_to_manual_review() {
    let queue = setup_test_queue().await;
    let (topic, item) = submit_topic(&queue, "deleted before review", None).await;
    sqlx::query("DELETE FROM topics WHERE id = ?")
        .bind(topic.id)
        .execute(queue.pool())
        .await
        .unwrap();

    let screener = Arc::new(MockScreener::approving());
    let worker = queue.worker(QueueType::TopicCreation, None, screener.clone());

    let outcome = worker.process_next().await.unwrap().unwrap();
    let WorkOutcome::Failed(FailureDisposition::Exhausted { item: failed }) = outcome else {
        panic!("missing content should not be retried");
    };
    assert_eq!(failed.id, item.id);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.outcome, Some(ItemOutcome::Exhausted));
    assert!(failed.needs_manual_review);
    assert_eq!(screener.call_count(), 0);

    let review = queue.coordinator.manual_review(10).await.unwrap();
    assert_eq!(review.len(), 1);
}
