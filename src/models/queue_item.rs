//! # Queue Item Model
//!
//! One logical shape shared by all four queue kinds.
//!
//! ## Overview
//!
//! A `QueueItem` tracks one piece of content through one queue. Rows are created on
//! submission (or when the previous stage of a multi-stage pipeline succeeds), mutated only
//! through the guarded primitives of [`crate::queue::QueueStore`], and never deleted:
//! terminal rows remain as the audit trail of every decision.
//!
//! ## Database Schema
//!
//! Maps to the `queue_items` table:
//! ```sql
//! CREATE TABLE queue_items (
//!   id INTEGER PRIMARY KEY AUTOINCREMENT,
//!   queue_type TEXT NOT NULL,
//!   content_type TEXT NOT NULL,
//!   content_pk BLOB NOT NULL,
//!   parent_pk BLOB,
//!   partition_key TEXT NOT NULL,
//!   priority_score INTEGER NOT NULL CHECK (priority_score BETWEEN 0 AND 100),
//!   status TEXT NOT NULL,
//!   -- ... lease, retry and outcome columns
//! );
//! ```
//!
//! ## Position
//!
//! `position_in_queue` is persisted as a cache, but every read in this crate selects the
//! rank computed live from the current pending set (see [`QUEUE_ITEM_COLUMNS`]), so the
//! value a caller observes always reflects the current ordering.

use crate::constants::{ContentType, ItemOutcome, QueueStatus, QueueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Total serving order inside a partition
pub(crate) const SERVING_ORDER: &str = "priority_score DESC, entered_queue_at ASC, id ASC";

/// Column list for every queue item read, aliased to `q`.
///
/// The rank counts pending items of the same queue and partition that sort at or before
/// the row under [`SERVING_ORDER`]; non-pending rows have no position.
pub(crate) const QUEUE_ITEM_COLUMNS: &str = r#"
    q.id, q.queue_type, q.content_type, q.content_pk, q.parent_pk, q.partition_key,
    q.priority_score, q.status, q.assigned_worker, q.entered_queue_at,
    q.started_processing_at, q.completed_at,
    CASE WHEN q.status = 'pending' THEN (
        SELECT COUNT(*) FROM queue_items o
        WHERE o.queue_type = q.queue_type
          AND o.partition_key = q.partition_key
          AND o.status = 'pending'
          AND (o.priority_score > q.priority_score
               OR (o.priority_score = q.priority_score
                   AND (o.entered_queue_at < q.entered_queue_at
                        OR (o.entered_queue_at = q.entered_queue_at AND o.id <= q.id))))
    ) END AS position_in_queue,
    q.attempts, q.next_attempt_at, q.outcome, q.feedback, q.last_error,
    q.needs_manual_review
"#;

/// A unit of screening or moderation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub queue_type: QueueType,
    pub content_type: ContentType,
    pub content_pk: Uuid,
    /// Second content reference (the topic of a post)
    pub parent_pk: Option<Uuid>,
    pub partition_key: String,
    pub priority_score: i64,
    pub status: QueueStatus,
    pub assigned_worker: Option<String>,
    pub entered_queue_at: DateTime<Utc>,
    pub started_processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 1-based rank among pending items of the partition; `None` unless pending
    pub position_in_queue: Option<i64>,
    pub attempts: i64,
    /// Retry backoff gate; the item is not claimable before this instant
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub outcome: Option<ItemOutcome>,
    pub feedback: Option<String>,
    pub last_error: Option<String>,
    pub needs_manual_review: bool,
}

impl QueueItem {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the item is currently leased to `worker_id`
    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == QueueStatus::Processing && self.assigned_worker.as_deref() == Some(worker_id)
    }

    /// Time spent waiting before a worker picked the item up (or until now if still pending)
    pub fn wait_time(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = self.started_processing_at.unwrap_or(now);
        end - self.entered_queue_at
    }
}

/// Values for a new queue item. Built through the per-queue constructors in
/// [`crate::queue::kinds`], which derive the partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub queue_type: QueueType,
    pub content_type: ContentType,
    pub content_pk: Uuid,
    pub parent_pk: Option<Uuid>,
    pub partition_key: String,
    pub priority_score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_item() -> QueueItem {
        let entered = Utc::now() - Duration::seconds(90);
        QueueItem {
            id: 1,
            queue_type: QueueType::PostModeration,
            content_type: ContentType::Post,
            content_pk: Uuid::new_v4(),
            parent_pk: Some(Uuid::new_v4()),
            partition_key: "topic:abc".to_string(),
            priority_score: 50,
            status: QueueStatus::Processing,
            assigned_worker: Some("worker-1".to_string()),
            entered_queue_at: entered,
            started_processing_at: Some(entered + Duration::seconds(30)),
            completed_at: None,
            position_in_queue: None,
            attempts: 0,
            next_attempt_at: None,
            outcome: None,
            feedback: None,
            last_error: None,
            needs_manual_review: false,
        }
    }

    #[test]
    fn test_lease_holder() {
        let item = sample_item();
        assert!(item.is_held_by("worker-1"));
        assert!(!item.is_held_by("worker-2"));
        assert!(!item.is_terminal());
    }

    #[test]
    fn test_wait_time_stops_at_claim() {
        let item = sample_item();
        assert_eq!(item.wait_time(Utc::now()), Duration::seconds(30));
    }
}
