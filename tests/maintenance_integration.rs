mod common;

use common::*;
use moderation_queue::constants::{ItemOutcome, ModerationOutcome, QueueStatus, QueueType};
use moderation_queue::database::DatabaseMigrations;
use moderation_queue::models::ContentRef;
use moderation_queue::queue::{FailureDisposition, MaintenanceRunner};
use moderation_queue::state_machine::{ContentStatus, PostStatus, TopicStatus};
use moderation_queue::{Content, QueueError};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_stale_lease_returns_to_pending() {
    let queue = setup_test_queue().await;
    let (_, item) = submit_topic(&queue, "abandoned", None).await;
    let (_, fresh) = submit_topic(&queue, "still held", None).await;

    queue.claimer.claim_item(item.id, "crashed-worker").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    queue.claimer.claim_item(fresh.id, "live-worker").await.unwrap().unwrap();

    let recovered = queue
        .store
        .requeue_stale(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(recovered, 1);

    let requeued = queue.store.get(item.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, QueueStatus::Pending);
    assert!(requeued.assigned_worker.is_none());
    assert_eq!(requeued.attempts, 0);
    assert_eq!(requeued.entered_queue_at, item.entered_queue_at);

    let still_held = queue.store.get(fresh.id).await.unwrap().unwrap();
    assert_eq!(still_held.status, QueueStatus::Processing);

    let reclaimed = queue
        .claimer
        .claim_next_in_queue(QueueType::TopicCreation, "rescuer")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.id, item.id);
}

#[tokio::test]
async fn test_heartbeat_keeps_lease() {
    let queue = setup_test_queue().await;
    let (_, item) = submit_topic(&queue, "long read", None).await;
    queue.claimer.claim_item(item.id, "worker-1").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(queue.store.touch_lease(item.id, "worker-1").await.unwrap());

    let recovered = queue
        .store
        .requeue_stale(Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(recovered, 0);
}

#[tokio::test]
async fn test_transient_failures_back_off_then_exhaust() {
    let queue = setup_test_queue().await;
    let (topic, item) = submit_topic(&queue, "flaky", None).await;

    queue.claimer.claim_item(item.id, "worker-1").await.unwrap().unwrap();
    let disposition = queue
        .finalizer
        .record_transient_failure(item.id, "worker-1", "classifier timeout")
        .await
        .unwrap();
    let FailureDisposition::Retrying { item: retrying, .. } = disposition else {
        panic!("first failure should be retried");
    };
    assert_eq!(retrying.status, QueueStatus::Pending);
    assert_eq!(retrying.attempts, 1);
    assert_eq!(retrying.last_error.as_deref(), Some("classifier timeout"));

    // Inside the backoff window the item is not claimable
    let early = queue
        .claimer
        .claim_next_in_queue(QueueType::TopicCreation, "worker-2")
        .await
        .unwrap();
    assert!(early.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let retried = queue
        .claimer
        .claim_next_in_queue(QueueType::TopicCreation, "worker-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retried.id, item.id);

    let disposition = queue
        .finalizer
        .record_transient_failure(item.id, "worker-2", "classifier timeout")
        .await
        .unwrap();
    let FailureDisposition::Exhausted { item: exhausted } = disposition else {
        panic!("second failure should exhaust the item");
    };
    assert_eq!(exhausted.status, QueueStatus::Failed);
    assert_eq!(exhausted.outcome, Some(ItemOutcome::Exhausted));
    assert!(exhausted.needs_manual_review);

    let review = queue.coordinator.manual_review(10).await.unwrap();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].id, item.id);

    // Content keeps waiting for a human
    let content = Content::get(queue.pool(), ContentRef::topic(topic.id)).await.unwrap();
    assert_eq!(content.status, ContentStatus::Topic(TopicStatus::PendingApproval));

    let after = queue
        .finalizer
        .record_transient_failure(item.id, "worker-2", "late report")
        .await
        .unwrap();
    assert!(matches!(after, FailureDisposition::AlreadyFinal { .. }));
}

#[tokio::test]
async fn test_failure_report_from_swept_worker_is_dropped() {
    let queue = setup_test_queue().await;
    let (_, item) = submit_topic(&queue, "contested", None).await;

    queue.claimer.claim_item(item.id, "worker-a").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        queue.store.requeue_stale(Duration::from_millis(10)).await.unwrap(),
        1
    );

    // Swept and not yet re-claimed: the report must not count an attempt
    let disposition = queue
        .finalizer
        .record_transient_failure(item.id, "worker-a", "late timeout")
        .await
        .unwrap();
    let FailureDisposition::LeaseLost { item: pending } = disposition else {
        panic!("a swept worker should not record failures");
    };
    assert_eq!(pending.status, QueueStatus::Pending);
    assert_eq!(pending.attempts, 0);

    queue.claimer.claim_item(item.id, "worker-b").await.unwrap().unwrap();
    let disposition = queue
        .finalizer
        .record_transient_failure(item.id, "worker-a", "late timeout")
        .await
        .unwrap();
    let FailureDisposition::LeaseLost { item: held } = disposition else {
        panic!("a swept worker should not revoke the new lease");
    };
    assert_eq!(held.status, QueueStatus::Processing);
    assert_eq!(held.assigned_worker.as_deref(), Some("worker-b"));
    assert_eq!(held.attempts, 0);
    assert!(held.last_error.is_none());

    assert!(queue.claimer.extend_lease(item.id, "worker-b").await.unwrap());
    let stolen = queue
        .claimer
        .claim_next_in_queue(QueueType::TopicCreation, "worker-c")
        .await
        .unwrap();
    assert!(stolen.is_none());
}

#[tokio::test]
async fn test_reconciler_pages_past_batch_size() {
    let mut config = test_config();
    config.maintenance.reconcile_batch_size = 1;
    let queue = setup_test_queue_with(config).await;

    let (_, consistent) = submit_topic(&queue, "decided normally", None).await;
    queue
        .finalizer
        .finalize(consistent.id, ModerationOutcome::Approved, None)
        .await
        .unwrap();
    submit_topic(&queue, "still waiting", None).await;
    let (lost, lost_item) = submit_topic(&queue, "decision lost", None).await;
    queue
        .store
        .mark_terminal(lost_item.id, ItemOutcome::Rejected, None)
        .await
        .unwrap();
    let (elsewhere, elsewhere_item) = submit_topic(&queue, "decided elsewhere", None).await;
    sqlx::query("UPDATE topics SET status = 'approved' WHERE id = ?")
        .bind(elsewhere.id)
        .execute(queue.pool())
        .await
        .unwrap();

    let report = queue.maintenance_runner().reconciler().reconcile().await.unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.redriven, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(report.failed, 0);

    let content = Content::get(queue.pool(), ContentRef::topic(lost.id)).await.unwrap();
    assert_eq!(content.status, ContentStatus::Topic(TopicStatus::Rejected));
    let closed = queue.store.get(elsewhere_item.id).await.unwrap().unwrap();
    assert_eq!(closed.status, QueueStatus::Completed);
}

#[tokio::test]
async fn test_reconciler_closes_items_decided_elsewhere() {
    let queue = setup_test_queue().await;
    let (topic, item) = submit_topic(&queue, "decided out of band", None).await;

    sqlx::query("UPDATE topics SET status = 'approved' WHERE id = ?")
        .bind(topic.id)
        .execute(queue.pool())
        .await
        .unwrap();

    let runner = queue.maintenance_runner();
    let report = runner.reconciler().reconcile().await.unwrap();
    assert_eq!(report.closed, 1);
    assert_eq!(report.failed, 0);

    let closed = queue.store.get(item.id).await.unwrap().unwrap();
    assert_eq!(closed.status, QueueStatus::Completed);
    assert_eq!(closed.outcome, Some(ItemOutcome::Approved));

    let second = runner.reconciler().reconcile().await.unwrap();
    assert_eq!(second.repaired(), 0);
}

#[tokio::test]
async fn test_reconciler_redrives_missing_transition_and_chain() {
    let queue = setup_test_queue().await;
    let (topic, _) = submit_topic(&queue, "host", None).await;
    let (post, item) = submit_post(&queue, topic.id, "reply", None).await;

    // The item was closed but the decision never reached the content
    queue
        .store
        .mark_terminal(item.id, ItemOutcome::Approved, None)
        .await
        .unwrap();

    let report = queue.maintenance_runner().reconciler().reconcile().await.unwrap();
    assert_eq!(report.redriven, 1);
    assert_eq!(report.chained_restored, 1);

    let content = Content::get(queue.pool(), ContentRef::post(post.id)).await.unwrap();
    assert_eq!(content.status, ContentStatus::Post(PostStatus::InTransit));

    let active = queue.store.find_active_by_content(post.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].queue_type, QueueType::PostModeration);
}

#[tokio::test]
async fn test_run_once_reports_every_pass() {
    let queue = setup_test_queue().await;
    let (_, item) = submit_topic(&queue, "stuck", None).await;
    submit_topic(&queue, "waiting", None).await;
    queue.claimer.claim_item(item.id, "gone").await.unwrap().unwrap();

    let mut config = queue.config().clone();
    config.lease.timeout_seconds = 0;
    let runner = MaintenanceRunner::new(queue.store.clone(), config.lease, config.maintenance);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = runner.run_once().await.unwrap();
    assert_eq!(report.leases_recovered, 1);
    assert_eq!(report.positions_refreshed, 2);
}

#[tokio::test]
async fn test_runner_stops_on_shutdown() {
    let queue = setup_test_queue().await;
    let runner = queue.maintenance_runner();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner should stop")
        .unwrap();
}

#[tokio::test]
async fn test_refresh_positions_caches_ranks() {
    let queue = setup_test_queue().await;
    let (_, low) = submit_topic(&queue, "low", Some(10)).await;
    let (_, high) = submit_topic(&queue, "high", Some(90)).await;

    let touched = queue
        .store
        .refresh_positions(QueueType::TopicCreation, "global")
        .await
        .unwrap();
    assert_eq!(touched, 2);

    let cached: Vec<(i64, Option<i64>)> = sqlx::query_as(
        "SELECT id, position_in_queue FROM queue_items ORDER BY position_in_queue",
    )
    .fetch_all(queue.pool())
    .await
    .unwrap();
    assert_eq!(cached, vec![(high.id, Some(1)), (low.id, Some(2))]);
}

#[tokio::test]
async fn test_overview_of_empty_store() {
    let queue = setup_test_queue().await;
    let overview = queue.coordinator.overview().await.unwrap();

    assert_eq!(overview.queues.len(), 4);
    assert_eq!(overview.total_pending(), 0);
    for stats in &overview.queues {
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.processing_count, 0);
        assert_eq!(stats.oldest_wait_seconds, 0.0);
    }
}

#[tokio::test]
async fn test_overview_counts_by_queue() {
    let queue = setup_test_queue().await;
    let (topic, topic_item) = submit_topic(&queue, "host", None).await;
    submit_post(&queue, topic.id, "one", None).await;
    submit_post(&queue, topic.id, "two", None).await;
    queue.claimer.claim_item(topic_item.id, "worker-1").await.unwrap().unwrap();

    let overview = queue.coordinator.overview().await.unwrap();
    let topics = overview.for_queue(QueueType::TopicCreation).unwrap();
    assert_eq!(topics.pending_count, 0);
    assert_eq!(topics.processing_count, 1);
    let screening = overview.for_queue(QueueType::TosScreening).unwrap();
    assert_eq!(screening.pending_count, 2);
    assert_eq!(overview.total_pending(), 2);
}

#[tokio::test]
async fn test_dashboard_joins_content() {
    let queue = setup_test_queue().await;
    let (topic, _) = submit_topic(&queue, "Weekly thread", None).await;
    let (_, busy) = submit_topic(&queue, "Being reviewed", None).await;
    queue.claimer.claim_item(busy.id, "moderator").await.unwrap().unwrap();

    let entries = queue
        .coordinator
        .dashboard(QueueType::TopicCreation, 10, 0)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].item.id, busy.id);
    assert_eq!(entries[1].title.as_deref(), Some("Weekly thread"));
    assert_eq!(entries[1].author_id, Some(topic.author_id));
    assert_eq!(entries[1].content_status.as_deref(), Some("pending_approval"));
}

#[tokio::test]
async fn test_external_override_of_decided_content() {
    let queue = setup_test_queue().await;
    let (topic, item) = submit_topic(&queue, "appealed", None).await;
    let target = ContentStatus::Topic(TopicStatus::Rejected);

    let err = queue
        .apply_external_override(ContentRef::topic(topic.id), target, "appeal")
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::StateTransition(_)));

    queue
        .finalizer
        .finalize(item.id, ModerationOutcome::Approved, None)
        .await
        .unwrap();

    let err = queue
        .apply_external_override(ContentRef::topic(topic.id), target, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    let change = queue
        .apply_external_override(ContentRef::topic(topic.id), target, "flag upheld")
        .await
        .unwrap();
    assert_eq!(change.from_status, "approved");
    assert_eq!(change.to_status, "rejected");
    assert!(change.queue_item_id.is_none());

    // The reconciler leaves the override alone
    let report = queue.maintenance_runner().reconciler().reconcile().await.unwrap();
    assert_eq!(report.repaired(), 0);
    let content = Content::get(queue.pool(), ContentRef::topic(topic.id)).await.unwrap();
    assert_eq!(content.status, target);
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let queue = setup_test_queue().await;
    let applied = DatabaseMigrations::run_all(queue.pool()).await.unwrap();
    assert_eq!(applied, 0);
    assert!(queue.database.health_check().await.unwrap());
}
