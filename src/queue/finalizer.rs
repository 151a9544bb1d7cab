//! # Finalizer
//!
//! Records the result of an evaluation.
//!
//! ## Overview
//!
//! [`Finalizer::finalize`] runs as one store transaction:
//!
//! 1. close the queue item with the outcome (`completed`)
//! 2. drive the content status machine to the matching status, with its audit row
//! 3. enqueue the follow-up item when the queue kind chains (ToS screening pass)
//!
//! Nothing is visible until the commit, so the item and the content are never observed
//! half-applied. Events are published only after the commit.
//!
//! ## Idempotence
//!
//! Leases can expire while a worker is still evaluating, so two workers may finalize the same
//! item. The first commit wins. A repeat with the same outcome is a no-op returning the
//! current state (and does not enqueue the follow-up again); a repeat with a different
//! outcome fails with [`QueueError::ConflictingOutcome`].
//!
//! ## Transient Failures
//!
//! [`Finalizer::record_transient_failure`] returns the item to `pending` behind an
//! exponential backoff gate until `retry.max_attempts` is reached, then fails it with
//! outcome `exhausted` and flags it for manual review. The content keeps its pre-decision
//! status. Only the worker holding the lease can report a failure: a report from a worker
//! whose lease was swept and handed to someone else is dropped as
//! [`FailureDisposition::LeaseLost`]. [`Finalizer::record_permanent_failure`] skips the
//! retries and routes the item to manual review at once.

use super::kinds::QueueKind;
use super::store::QueueStore;
use crate::config::RetryConfig;
use crate::constants::{events, ItemOutcome, ModerationOutcome, QueueStatus};
use crate::error::{QueueError, Result};
use crate::logging::{log_error, log_queue_operation};
use crate::models::{Content, ContentRef, ContentStatusTransition, QueueItem};
use crate::state_machine::ContentStatusMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// State after a finalize call
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResult {
    pub content: Content,
    pub item: QueueItem,
    /// Follow-up item created by this call
    pub chained: Option<QueueItem>,
    /// Audit row of the content change made by this call
    pub status_change: Option<ContentStatusTransition>,
    /// The item was already final with the same outcome; nothing changed
    pub replayed: bool,
}

/// What a transient evaluation failure did to the item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Back to pending, claimable again from `next_attempt_at`
    Retrying {
        item: QueueItem,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retries used up; failed and flagged for manual review
    Exhausted { item: QueueItem },
    /// Someone finalized the item first; the failure was not recorded
    AlreadyFinal { item: QueueItem },
    /// The reporting worker no longer holds the lease; the failure was not recorded
    LeaseLost { item: QueueItem },
}

impl FailureDisposition {
    pub fn item(&self) -> &QueueItem {
        match self {
            Self::Retrying { item, .. }
            | Self::Exhausted { item }
            | Self::AlreadyFinal { item }
            | Self::LeaseLost { item } => item,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Finalizer {
    store: QueueStore,
    retry: RetryConfig,
}

impl Finalizer {
    pub fn new(store: QueueStore, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Close an item with a moderation decision and apply it to the content.
    #[instrument(skip(self, feedback))]
    pub async fn finalize(
        &self,
        item_id: i64,
        outcome: ModerationOutcome,
        feedback: Option<&str>,
    ) -> Result<FinalizeResult> {
        let now = Utc::now();
        let requested = ItemOutcome::from(outcome);

        // Open with the guarded write so the transaction holds the store's write lock
        // before it reads anything.
        let mut tx = self.store.pool().begin().await?;
        if !QueueStore::close_in(&mut *tx, item_id, requested, feedback, now).await? {
            let item = QueueStore::explain_unclosed(&mut *tx, item_id, requested).await?;
            let content = Content::get(&mut *tx, content_ref(&item)).await?;
            tx.rollback().await?;

            debug!(item_id, outcome = %outcome, "Item already finalized with this outcome");
            return Ok(FinalizeResult {
                content,
                item,
                chained: None,
                status_change: None,
                replayed: true,
            });
        }

        let item = QueueStore::fetch_item(&mut *tx, item_id)
            .await?
            .ok_or(QueueError::NotFound(item_id))?;

        let applied = ContentStatusMachine::apply_decision(
            &mut *tx,
            content_ref(&item),
            item.queue_type,
            outcome,
            item.id,
            feedback,
            now,
        )
        .await?;

        // Only the call that moved the content chains; a replay must not re-enqueue
        let mut chained = None;
        if applied.transition.is_some() {
            if let Some(next) = QueueKind::chained_item(&item, outcome) {
                if let Some(chained_id) = QueueStore::insert_chained(&mut *tx, &next, now).await? {
                    chained = QueueStore::fetch_item(&mut *tx, chained_id).await?;
                }
            }
        }

        let content = Content::get(&mut *tx, content_ref(&item)).await?;
        tx.commit().await?;

        info!(
            item_id,
            queue_type = %item.queue_type,
            outcome = %outcome,
            content_status = %applied.status,
            chained_item = chained.as_ref().map(|c| c.id),
            "Finalized item"
        );

        let publisher = self.store.events();
        let _ = publisher.publish_item(events::ITEM_FINALIZED, &item).await;
        if let Some(change) = &applied.transition {
            let _ = publisher.publish_status_change(change).await;
        }
        if let Some(next) = &chained {
            let _ = publisher.publish_item(events::ITEM_ENQUEUED, next).await;
        }

        Ok(FinalizeResult {
            content,
            item,
            chained,
            status_change: applied.transition,
            replayed: false,
        })
    }

    /// Record that `worker_id` failed to evaluate an item in a way worth retrying.
    #[instrument(skip(self))]
    pub async fn record_transient_failure(
        &self,
        item_id: i64,
        worker_id: &str,
        error: &str,
    ) -> Result<FailureDisposition> {
        self.record_failure(item_id, worker_id, error, false).await
    }

    /// Record a failure no retry can fix: the item goes straight to manual review.
    #[instrument(skip(self))]
    pub async fn record_permanent_failure(
        &self,
        item_id: i64,
        worker_id: &str,
        error: &str,
    ) -> Result<FailureDisposition> {
        self.record_failure(item_id, worker_id, error, true).await
    }

    async fn record_failure(
        &self,
        item_id: i64,
        worker_id: &str,
        error: &str,
        permanent: bool,
    ) -> Result<FailureDisposition> {
        let max_attempts = i64::from(self.retry.max_attempts);

        // A lost guard means the item was closed, re-leased, or had its attempt count raised
        // by a concurrent writer. Each of those ends the loop on the next read.
        loop {
            let item = self
                .store
                .get(item_id)
                .await?
                .ok_or(QueueError::NotFound(item_id))?;
            if item.is_terminal() {
                return Ok(FailureDisposition::AlreadyFinal { item });
            }
            if item.status != QueueStatus::Processing
                || item.assigned_worker.as_deref() != Some(worker_id)
            {
                warn!(
                    item_id,
                    worker_id,
                    holder = item.assigned_worker.as_deref().unwrap_or("none"),
                    "Dropping failure report from a worker that lost its lease"
                );
                return Ok(FailureDisposition::LeaseLost { item });
            }

            let attempts = item.attempts + 1;
            if permanent || attempts >= max_attempts {
                if !self.store.exhaust(item_id, worker_id, item.attempts, error).await? {
                    continue;
                }
                let item = self
                    .store
                    .get(item_id)
                    .await?
                    .ok_or(QueueError::NotFound(item_id))?;

                log_error(
                    "finalizer",
                    "record_failure",
                    error,
                    Some(&format!("item={item_id} attempts={attempts} routed to manual review")),
                );
                let _ = self
                    .store
                    .events()
                    .publish_item(events::ITEM_EXHAUSTED, &item)
                    .await;
                return Ok(FailureDisposition::Exhausted { item });
            }

            let delay = chrono::Duration::from_std(self.retry.backoff_for(attempts as u32))
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            let next_attempt_at = Utc::now() + delay;
            if !self
                .store
                .requeue_after_failure(item_id, worker_id, item.attempts, error, next_attempt_at)
                .await?
            {
                continue;
            }

            let item = self
                .store
                .get(item_id)
                .await?
                .ok_or(QueueError::NotFound(item_id))?;

            log_queue_operation(
                "requeue_after_failure",
                item.queue_type.as_str(),
                Some(item_id),
                Some(&item.partition_key),
                item.status.as_str(),
                Some(&format!("attempts={attempts} retry_at={next_attempt_at}")),
            );
            let _ = self
                .store
                .events()
                .publish(
                    events::ITEM_REQUEUED,
                    json!({
                        "item_id": item.id,
                        "queue_type": item.queue_type,
                        "partition_key": item.partition_key,
                        "attempts": item.attempts,
                        "next_attempt_at": next_attempt_at,
                        "error": error,
                    }),
                )
                .await;
            return Ok(FailureDisposition::Retrying {
                item,
                next_attempt_at,
            });
        }
    }
}

fn content_ref(item: &QueueItem) -> ContentRef {
    ContentRef::new(item.content_type, item.content_pk)
}
