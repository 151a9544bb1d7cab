//! # Queue Store
//!
//! Durable storage and guarded state transitions for queue items of all four kinds.
//!
//! ## Mutation Discipline
//!
//! Every status change is a single conditional `UPDATE ... WHERE status = ...` statement,
//! so the store (not process memory) decides who wins a race. No other component writes
//! `queue_items.status`; the claimer, finalizer and maintenance passes go through the
//! primitives here, some of which take the caller's connection so they can join a wider
//! transaction.
//!
//! ## Status Flow
//!
//! ```text
//! pending -> processing -> completed | failed
//!    ^           |
//!    +-----------+   lease expiry or transient evaluation failure
//! pending -> failed  withdrawal
//! ```

use super::kinds::{validate_priority, QueueKind};
use crate::constants::{events, ItemOutcome, QueueStatus, QueueType};
use crate::error::{is_unique_violation, QueueError, Result};
use crate::events::EventPublisher;
use crate::models::queue_item::{QUEUE_ITEM_COLUMNS, SERVING_ORDER};
use crate::models::{Content, ContentRef, NewQueueItem, QueueItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A lease recovered by [`QueueStore::requeue_stale`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StaleLease {
    pub item_id: i64,
    pub queue_type: QueueType,
    pub partition_key: String,
    /// Worker that held the lease when it expired
    pub worker: Option<String>,
    pub leased_since: DateTime<Utc>,
}

fn select_items(filter: &str) -> String {
    format!("SELECT {QUEUE_ITEM_COLUMNS} FROM queue_items q {filter}")
}

/// Handle on the shared queue store
#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: SqlitePool,
    events: EventPublisher,
}

impl QueueStore {
    pub fn new(pool: SqlitePool, events: EventPublisher) -> Self {
        Self { pool, events }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Add an item to its queue.
    ///
    /// Fails with [`QueueError::DuplicateEnqueue`] if the content already has a pending or
    /// processing item in the same queue type. The check is the store's partial unique
    /// index, so two concurrent submissions cannot both succeed.
    #[instrument(skip(self, new_item), fields(queue_type = %new_item.queue_type, partition_key = %new_item.partition_key, content_pk = %new_item.content_pk))]
    pub async fn enqueue(&self, new_item: NewQueueItem) -> Result<QueueItem> {
        validate_priority(new_item.priority_score)?;

        let kind = QueueKind::of(new_item.queue_type);
        if kind.content_type != new_item.content_type {
            return Err(QueueError::Validation(format!(
                "{} queue does not accept {} content",
                new_item.queue_type, new_item.content_type
            )));
        }
        if new_item.partition_key.trim().is_empty() {
            return Err(QueueError::Validation(
                "partition key must not be empty".to_string(),
            ));
        }

        let content = ContentRef::new(new_item.content_type, new_item.content_pk);
        if Content::find(&self.pool, content).await?.is_none() {
            return Err(QueueError::ContentNotFound {
                content_type: content.content_type.to_string(),
                content_pk: content.content_pk,
            });
        }

        let mut conn = self.pool.acquire().await?;
        let item_id = match Self::insert_item(&mut *conn, &new_item, Utc::now()).await {
            Ok(id) => id,
            Err(err) if is_unique_violation(&err) => {
                debug!("Content already has an active item in this queue");
                return Err(QueueError::DuplicateEnqueue {
                    queue_type: new_item.queue_type,
                    content_pk: new_item.content_pk,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let item = Self::fetch_item(&mut *conn, item_id)
            .await?
            .ok_or(QueueError::NotFound(item_id))?;
        drop(conn);

        info!(
            item_id = item.id,
            priority_score = item.priority_score,
            position = item.position_in_queue,
            "Enqueued item"
        );
        let _ = self.events.publish_item(events::ITEM_ENQUEUED, &item).await;

        Ok(item)
    }

    /// Enqueue `content` into `queue_type`, deriving the partition key from the content row
    pub async fn enqueue_content(
        &self,
        queue_type: QueueType,
        content: ContentRef,
        priority_score: Option<i64>,
    ) -> Result<QueueItem> {
        let content = Content::get(&self.pool, content).await?;
        let new_item = NewQueueItem::for_content(queue_type, &content, priority_score)?;
        self.enqueue(new_item).await
    }

    async fn insert_item(
        conn: &mut SqliteConnection,
        new_item: &NewQueueItem,
        now: DateTime<Utc>,
    ) -> std::result::Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            INSERT INTO queue_items
                (queue_type, content_type, content_pk, parent_pk, partition_key,
                 priority_score, status, entered_queue_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            RETURNING id
            "#,
        )
        .bind(new_item.queue_type)
        .bind(new_item.content_type)
        .bind(new_item.content_pk)
        .bind(new_item.parent_pk)
        .bind(&new_item.partition_key)
        .bind(new_item.priority_score)
        .bind(now)
        .fetch_one(conn)
        .await
    }

    /// Insert a follow-up item inside the caller's transaction. Returns `None` when the
    /// content already has an active item in that queue.
    pub(crate) async fn insert_chained(
        conn: &mut SqliteConnection,
        new_item: &NewQueueItem,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        validate_priority(new_item.priority_score)?;
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO queue_items
                (queue_type, content_type, content_pk, parent_pk, partition_key,
                 priority_score, status, entered_queue_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(new_item.queue_type)
        .bind(new_item.content_type)
        .bind(new_item.content_pk)
        .bind(new_item.parent_pk)
        .bind(&new_item.partition_key)
        .bind(new_item.priority_score)
        .bind(now)
        .fetch_optional(conn)
        .await?;

        Ok(id)
    }

    pub(crate) async fn fetch_item<'e, E>(executor: E, item_id: i64) -> Result<Option<QueueItem>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let sql = select_items("WHERE q.id = ?");
        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(item_id)
            .fetch_optional(executor)
            .await?;
        Ok(item)
    }

    /// Look up an item; `None` if it does not exist
    pub async fn get(&self, item_id: i64) -> Result<Option<QueueItem>> {
        Self::fetch_item(&self.pool, item_id).await
    }

    /// Pending items of one partition in serving order
    pub async fn list_pending(
        &self,
        queue_type: QueueType,
        partition_key: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueItem>> {
        let sql = select_items(&format!(
            "WHERE q.queue_type = ? AND q.partition_key = ? AND q.status = 'pending' \
             ORDER BY {SERVING_ORDER} LIMIT ? OFFSET ?"
        ));
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(queue_type)
            .bind(partition_key)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Atomically move a pending item to processing for `worker_id`.
    ///
    /// Fails with [`QueueError::AlreadyClaimed`] if the item is no longer pending when the
    /// guarded update runs.
    #[instrument(skip(self))]
    pub async fn mark_processing(&self, item_id: i64, worker_id: &str) -> Result<QueueItem> {
        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE queue_items
            SET status = 'processing', assigned_worker = ?, started_processing_at = ?,
                position_in_queue = NULL
            WHERE id = ? AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(worker_id)
        .bind(Utc::now())
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        let item = self.get(item_id).await?.ok_or(QueueError::NotFound(item_id))?;
        match claimed {
            Some(_) => Ok(item),
            None => Err(QueueError::AlreadyClaimed {
                item_id,
                current_status: item.status,
            }),
        }
    }

    /// Claim the first eligible pending item in a single guarded statement.
    ///
    /// The candidate subquery and the update run as one statement under the store's write
    /// lock; the repeated `status = 'pending'` guard keeps the update a no-op if the row
    /// changed anyway. Items still inside their retry backoff are skipped.
    pub(crate) async fn claim_first_eligible(
        &self,
        queue_type: QueueType,
        partition_key: Option<&str>,
        worker_id: &str,
    ) -> Result<Option<i64>> {
        let now = Utc::now();
        let sql = format!(
            r#"
            UPDATE queue_items
            SET status = 'processing', assigned_worker = ?, started_processing_at = ?,
                position_in_queue = NULL
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue_type = ?
                  AND (? IS NULL OR partition_key = ?)
                  AND status = 'pending'
                  AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
                ORDER BY {SERVING_ORDER}
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING id
            "#
        );

        let claimed = sqlx::query_scalar(&sql)
            .bind(worker_id)
            .bind(now)
            .bind(queue_type)
            .bind(partition_key)
            .bind(partition_key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(claimed)
    }

    /// The item [`Self::claim_first_eligible`] would claim right now, without claiming it
    pub async fn peek_next(
        &self,
        queue_type: QueueType,
        partition_key: Option<&str>,
    ) -> Result<Option<QueueItem>> {
        let sql = select_items(&format!(
            "WHERE q.queue_type = ? AND (? IS NULL OR q.partition_key = ?) \
             AND q.status = 'pending' \
             AND (q.next_attempt_at IS NULL OR q.next_attempt_at <= ?) \
             ORDER BY {SERVING_ORDER} LIMIT 1"
        ));
        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(queue_type)
            .bind(partition_key)
            .bind(partition_key)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Number of pending items a claim could take right now
    pub(crate) async fn count_eligible(
        &self,
        queue_type: QueueType,
        partition_key: Option<&str>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM queue_items
            WHERE queue_type = ? AND (? IS NULL OR partition_key = ?)
              AND status = 'pending'
              AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            "#,
        )
        .bind(queue_type)
        .bind(partition_key)
        .bind(partition_key)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Close a non-terminal item with `outcome` on the caller's connection.
    /// Returns whether this call performed the transition.
    pub(crate) async fn close_in(
        conn: &mut SqliteConnection,
        item_id: i64,
        outcome: ItemOutcome,
        feedback: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = ?, outcome = ?, feedback = COALESCE(?, feedback),
                completed_at = ?, next_attempt_at = NULL, position_in_queue = NULL
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(outcome.terminal_status())
        .bind(outcome)
        .bind(feedback)
        .bind(now)
        .bind(item_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Confirm on the caller's connection that an item is still closed with `outcome`.
    /// Being a write, it also takes the store's write lock for the caller's transaction.
    pub(crate) async fn confirm_outcome_in(
        conn: &mut SqliteConnection,
        item_id: i64,
        outcome: ItemOutcome,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items SET completed_at = completed_at
            WHERE id = ? AND status = ? AND outcome = ?
            "#,
        )
        .bind(item_id)
        .bind(outcome.terminal_status())
        .bind(outcome)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Whether the content ever had an item in `queue_type`, in any status
    pub(crate) async fn has_item_in(
        conn: &mut SqliteConnection,
        queue_type: QueueType,
        content_pk: Uuid,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE queue_type = ? AND content_pk = ?",
        )
        .bind(queue_type)
        .bind(content_pk)
        .fetch_one(conn)
        .await?;
        Ok(count > 0)
    }

    /// Explain why [`Self::close_in`] changed nothing: the item is missing, or terminal
    /// with the same outcome (returned as-is), or terminal with a different one.
    pub(crate) async fn explain_unclosed(
        conn: &mut SqliteConnection,
        item_id: i64,
        requested: ItemOutcome,
    ) -> Result<QueueItem> {
        let item = Self::fetch_item(conn, item_id)
            .await?
            .ok_or(QueueError::NotFound(item_id))?;

        match item.outcome {
            Some(recorded) if item.is_terminal() && recorded == requested => Ok(item),
            Some(recorded) => Err(QueueError::ConflictingOutcome {
                item_id,
                recorded,
                requested,
            }),
            None => Err(QueueError::Validation(format!(
                "queue item {item_id} is {} without an outcome",
                item.status
            ))),
        }
    }

    /// Set an item terminal with `outcome`. Repeating the same outcome is a no-op.
    #[instrument(skip(self, feedback))]
    pub async fn mark_terminal(
        &self,
        item_id: i64,
        outcome: ItemOutcome,
        feedback: Option<&str>,
    ) -> Result<QueueItem> {
        let mut conn = self.pool.acquire().await?;
        if !Self::close_in(&mut *conn, item_id, outcome, feedback, Utc::now()).await? {
            return Self::explain_unclosed(&mut *conn, item_id, outcome).await;
        }
        Self::fetch_item(&mut *conn, item_id)
            .await?
            .ok_or(QueueError::NotFound(item_id))
    }

    /// Cancel a pending item (the user withdrew the content).
    ///
    /// A processing item cannot be cancelled mid-flight; a terminal item is returned
    /// unchanged.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, item_id: i64) -> Result<QueueItem> {
        let withdrawn: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE queue_items
            SET status = 'failed', outcome = 'withdrawn', completed_at = ?,
                next_attempt_at = NULL, position_in_queue = NULL
            WHERE id = ? AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(Utc::now())
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        let item = self.get(item_id).await?.ok_or(QueueError::NotFound(item_id))?;
        if withdrawn.is_some() {
            info!(item_id, queue_type = %item.queue_type, "Withdrew pending item");
            let _ = self.events.publish_item(events::ITEM_WITHDRAWN, &item).await;
            return Ok(item);
        }

        match item.status {
            QueueStatus::Processing => Err(QueueError::NotCancellable {
                item_id,
                status: item.status,
            }),
            _ => Ok(item),
        }
    }

    /// Heartbeat: refresh the lease if `worker_id` still holds it
    pub async fn touch_lease(&self, item_id: i64, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items SET started_processing_at = ?
            WHERE id = ? AND status = 'processing' AND assigned_worker = ?
            "#,
        )
        .bind(Utc::now())
        .bind(item_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Return processing items whose lease is older than `timeout` to pending.
    /// Returns how many items were recovered.
    pub async fn requeue_stale(&self, timeout: Duration) -> Result<u64> {
        Ok(self.requeue_stale_items(timeout).await?.len() as u64)
    }

    /// Like [`Self::requeue_stale`], reporting each recovered lease.
    ///
    /// The worker is cleared and the item keeps its original entry time, so it resumes its
    /// place in the ordering. A lease refreshed between the scan and the update is left
    /// alone. Lease expiry does not count as an evaluation attempt.
    #[instrument(skip(self))]
    pub async fn requeue_stale_items(&self, timeout: Duration) -> Result<Vec<StaleLease>> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| QueueError::Validation(format!("lease timeout out of range: {e}")))?;
        let cutoff = Utc::now() - timeout;

        let candidates = sqlx::query_as::<_, StaleLease>(
            r#"
            SELECT id AS item_id, queue_type, partition_key,
                   assigned_worker AS worker, started_processing_at AS leased_since
            FROM queue_items
            WHERE status = 'processing' AND started_processing_at < ?
            ORDER BY started_processing_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut recovered = Vec::with_capacity(candidates.len());
        for lease in candidates {
            let result = sqlx::query(
                r#"
                UPDATE queue_items
                SET status = 'pending', assigned_worker = NULL, started_processing_at = NULL
                WHERE id = ? AND status = 'processing' AND started_processing_at < ?
                "#,
            )
            .bind(lease.item_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                let _ = self
                    .events
                    .publish(
                        events::LEASE_EXPIRED,
                        json!({
                            "item_id": lease.item_id,
                            "queue_type": lease.queue_type,
                            "partition_key": lease.partition_key,
                            "worker": lease.worker,
                            "leased_since": lease.leased_since,
                        }),
                    )
                    .await;
                recovered.push(lease);
            }
        }

        if !recovered.is_empty() {
            debug!(count = recovered.len(), "Requeued stale leases");
        }
        Ok(recovered)
    }

    /// Return an item to pending after a transient evaluation failure.
    /// Guarded on `worker_id` still holding the lease and on the attempt count it observed.
    pub(crate) async fn requeue_after_failure(
        &self,
        item_id: i64,
        worker_id: &str,
        observed_attempts: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', assigned_worker = NULL, started_processing_at = NULL,
                attempts = attempts + 1, last_error = ?, next_attempt_at = ?
            WHERE id = ? AND status = 'processing' AND assigned_worker = ? AND attempts = ?
            "#,
        )
        .bind(error)
        .bind(next_attempt_at)
        .bind(item_id)
        .bind(worker_id)
        .bind(observed_attempts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fail an item whose retries are used up and flag it for manual review.
    /// Guarded like [`QueueStore::requeue_after_failure`].
    pub(crate) async fn exhaust(
        &self,
        item_id: i64,
        worker_id: &str,
        observed_attempts: i64,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'failed', outcome = 'exhausted', completed_at = ?,
                attempts = attempts + 1, last_error = ?, needs_manual_review = 1,
                next_attempt_at = NULL, position_in_queue = NULL
            WHERE id = ? AND status = 'processing' AND assigned_worker = ? AND attempts = ?
            "#,
        )
        .bind(Utc::now())
        .bind(error)
        .bind(item_id)
        .bind(worker_id)
        .bind(observed_attempts)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            warn!(item_id, error, "Item exhausted its retries, flagged for manual review");
            return Ok(true);
        }
        Ok(false)
    }

    /// Pending and processing items of one content entity
    pub async fn find_active_by_content(&self, content_pk: Uuid) -> Result<Vec<QueueItem>> {
        let sql = select_items(
            "WHERE q.content_pk = ? AND q.status IN ('pending', 'processing') ORDER BY q.id",
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(content_pk)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Every item ever created for one content entity, oldest first
    pub async fn items_for_content(&self, content_pk: Uuid) -> Result<Vec<QueueItem>> {
        let sql = select_items("WHERE q.content_pk = ? ORDER BY q.id");
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(content_pk)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Failed items flagged for manual handling, most recent first
    pub async fn list_manual_review(&self, limit: i64) -> Result<Vec<QueueItem>> {
        let sql = select_items(
            "WHERE q.status = 'failed' AND q.needs_manual_review = 1 \
             ORDER BY q.completed_at DESC, q.id DESC LIMIT ?",
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// One page of items completed with a moderation decision since `since`, keyed on
    /// id: pass the last id of the previous page as `after_id`.
    pub(crate) async fn list_recently_decided(
        &self,
        since: DateTime<Utc>,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<QueueItem>> {
        let sql = select_items(
            "WHERE q.status = 'completed' AND q.outcome IN ('approved', 'rejected', 'violation') \
             AND q.completed_at >= ? AND q.id > ? ORDER BY q.id ASC LIMIT ?",
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(since)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// One page of pending and processing items across all queues, keyed on id
    pub(crate) async fn list_active(&self, after_id: i64, limit: i64) -> Result<Vec<QueueItem>> {
        let sql = select_items(
            "WHERE q.status IN ('pending', 'processing') AND q.id > ? ORDER BY q.id ASC LIMIT ?",
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Rewrite the cached `position_in_queue` of one partition. Returns rows touched.
    pub async fn refresh_positions(&self, queue_type: QueueType, partition_key: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let ranked = sqlx::query(&format!(
            r#"
            UPDATE queue_items SET position_in_queue = ranked.rn
            FROM (
                SELECT id, ROW_NUMBER() OVER (ORDER BY {SERVING_ORDER}) AS rn
                FROM queue_items
                WHERE queue_type = ? AND partition_key = ? AND status = 'pending'
            ) AS ranked
            WHERE queue_items.id = ranked.id
              AND queue_items.position_in_queue IS NOT ranked.rn
            "#
        ))
        .bind(queue_type)
        .bind(partition_key)
        .execute(&mut *tx)
        .await?;

        let cleared = sqlx::query(
            r#"
            UPDATE queue_items SET position_in_queue = NULL
            WHERE queue_type = ? AND partition_key = ? AND status != 'pending'
              AND position_in_queue IS NOT NULL
            "#,
        )
        .bind(queue_type)
        .bind(partition_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ranked.rows_affected() + cleared.rows_affected())
    }

    /// Refresh the cached positions of every partition that has pending work or stale cache
    pub async fn refresh_all_positions(&self) -> Result<u64> {
        let partitions: Vec<(QueueType, String)> = sqlx::query_as(
            r#"
            SELECT DISTINCT queue_type, partition_key FROM queue_items
            WHERE status = 'pending' OR position_in_queue IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut touched = 0;
        for (queue_type, partition_key) in partitions {
            touched += self.refresh_positions(queue_type, &partition_key).await?;
        }
        Ok(touched)
    }
}
