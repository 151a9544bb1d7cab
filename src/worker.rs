//! # Queue Worker
//!
//! Background evaluation loop: claim an item, hand its content to a [`ContentScreener`],
//! then finalize the decision or record a transient failure.
//!
//! The screener is the opaque judgment (a human moderator's tool, a classifier service, a
//! rules engine) and the only extension point; everything around it is the scheduler's.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use moderation_queue::constants::{ModerationOutcome, QueueType};
//! use moderation_queue::models::{Content, QueueItem};
//! use moderation_queue::worker::{ContentScreener, Evaluation, ScreeningError};
//!
//! struct ApproveEverything;
//!
//! #[async_trait::async_trait]
//! impl ContentScreener for ApproveEverything {
//!     async fn screen(
//!         &self,
//!         _item: &QueueItem,
//!         _content: &Content,
//!     ) -> Result<Evaluation, ScreeningError> {
//!         Ok(Evaluation::approved())
//!     }
//! }
//! ```

use crate::config::WorkerConfig;
use crate::constants::{ModerationOutcome, QueueType};
use crate::error::{QueueError, Result};
use crate::logging::log_error;
use crate::models::{Content, ContentRef, QueueItem};
use crate::queue::{Claimer, FailureDisposition, FinalizeResult, Finalizer, QueueStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A screener's decision on one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub outcome: ModerationOutcome,
    pub feedback: Option<String>,
}

impl Evaluation {
    pub fn approved() -> Self {
        Self {
            outcome: ModerationOutcome::Approved,
            feedback: None,
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            outcome: ModerationOutcome::Rejected,
            feedback: Some(feedback.into()),
        }
    }

    pub fn violation(feedback: impl Into<String>) -> Self {
        Self {
            outcome: ModerationOutcome::Violation,
            feedback: Some(feedback.into()),
        }
    }
}

/// Failure to reach a decision. Every variant is retried by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error("Screening unavailable: {0}")]
    Unavailable(String),
    #[error("Screening timed out after {0:?}")]
    TimedOut(Duration),
}

/// The judgment behind a moderation decision
#[async_trait::async_trait]
pub trait ContentScreener: Send + Sync {
    async fn screen(
        &self,
        item: &QueueItem,
        content: &Content,
    ) -> std::result::Result<Evaluation, ScreeningError>;

    /// Upper bound on a single screening call; defaults to the worker's lease timeout.
    /// The worker renews its lease while the call runs.
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
}

/// Shortest interval between lease heartbeats
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Why an evaluation produced no decision
enum EvaluationFailure {
    /// Worth another attempt later
    Transient(String),
    /// No retry can succeed, e.g. the content row is gone
    Permanent(String),
}

/// What one unit of work did
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    Finalized(Box<FinalizeResult>),
    Failed(FailureDisposition),
}

/// Claims and evaluates items of one queue type, optionally pinned to one partition
pub struct QueueWorker {
    worker_id: String,
    queue_type: QueueType,
    partition_key: Option<String>,
    store: QueueStore,
    claimer: Claimer,
    finalizer: Finalizer,
    screener: Arc<dyn ContentScreener>,
    config: WorkerConfig,
    screening_timeout: Duration,
    heartbeat_interval: Duration,
}

impl QueueWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue_type: QueueType,
        partition_key: Option<String>,
        store: QueueStore,
        claimer: Claimer,
        finalizer: Finalizer,
        screener: Arc<dyn ContentScreener>,
        config: WorkerConfig,
        lease_timeout: Duration,
    ) -> Self {
        let worker_id = format!("{}-{}", config.worker_id_prefix, Uuid::new_v4().simple());
        Self {
            worker_id,
            queue_type,
            partition_key,
            store,
            claimer,
            finalizer,
            screener,
            config,
            screening_timeout: lease_timeout,
            heartbeat_interval: (lease_timeout / 3).max(MIN_HEARTBEAT),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// How often the lease is renewed while a screening call runs (a third of the lease
    /// timeout unless set)
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Claim and evaluate one item. `Ok(None)` when nothing is eligible.
    #[instrument(skip(self), fields(worker_id = %self.worker_id, queue_type = %self.queue_type))]
    pub async fn process_next(&self) -> Result<Option<WorkOutcome>> {
        let claimed = match &self.partition_key {
            Some(partition_key) => {
                self.claimer
                    .claim_next(self.queue_type, Some(partition_key), Some(&self.worker_id))
                    .await?
            }
            None => {
                self.claimer
                    .claim_next_in_queue(self.queue_type, &self.worker_id)
                    .await?
            }
        };
        let Some(item) = claimed else {
            return Ok(None);
        };

        let evaluation = match self.evaluate(&item).await {
            Ok(evaluation) => evaluation,
            Err(EvaluationFailure::Transient(reason)) => {
                warn!(item_id = item.id, reason = %reason, "Evaluation failed, recording transient failure");
                let disposition = self
                    .finalizer
                    .record_transient_failure(item.id, &self.worker_id, &reason)
                    .await?;
                return Ok(Some(WorkOutcome::Failed(disposition)));
            }
            Err(EvaluationFailure::Permanent(reason)) => {
                warn!(item_id = item.id, reason = %reason, "Item cannot be evaluated, routing to manual review");
                let disposition = self
                    .finalizer
                    .record_permanent_failure(item.id, &self.worker_id, &reason)
                    .await?;
                return Ok(Some(WorkOutcome::Failed(disposition)));
            }
        };

        let result = self
            .finalizer
            .finalize(item.id, evaluation.outcome, evaluation.feedback.as_deref())
            .await?;
        debug!(
            item_id = item.id,
            outcome = %evaluation.outcome,
            replayed = result.replayed,
            "Item evaluated"
        );
        Ok(Some(WorkOutcome::Finalized(Box::new(result))))
    }

    async fn evaluate(&self, item: &QueueItem) -> std::result::Result<Evaluation, EvaluationFailure> {
        let content_ref = ContentRef::new(item.content_type, item.content_pk);
        let content = Content::get(self.store.pool(), content_ref)
            .await
            .map_err(|e| match e {
                QueueError::ContentNotFound { .. } => EvaluationFailure::Permanent(e.to_string()),
                other => EvaluationFailure::Transient(other.to_string()),
            })?;

        let limit = self
            .screener
            .timeout_override()
            .unwrap_or(self.screening_timeout);
        let screening = tokio::time::timeout(limit, self.screener.screen(item, &content));
        tokio::pin!(screening);

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let verdict = loop {
            tokio::select! {
                verdict = &mut screening => break verdict,
                _ = heartbeat.tick() => {
                    // A lost lease is logged by the claimer; the verdict is still committed.
                    if let Err(e) = self.claimer.extend_lease(item.id, &self.worker_id).await {
                        log_error("worker", "heartbeat", &e.to_string(), Some(&self.worker_id));
                    }
                }
            }
        };

        match verdict {
            Ok(Ok(evaluation)) => Ok(evaluation),
            Ok(Err(e)) => Err(EvaluationFailure::Transient(e.to_string())),
            Err(_) => Err(EvaluationFailure::Transient(
                ScreeningError::TimedOut(limit).to_string(),
            )),
        }
    }

    /// Work until `shutdown` turns `true` or its sender is dropped, sleeping
    /// `poll_interval` whenever the queue is empty.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.worker_id,
            queue_type = %self.queue_type,
            partition_key = self.partition_key.as_deref().unwrap_or("*"),
            "Starting queue worker"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_next().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    log_error("worker", "process_next", &e.to_string(), Some(&self.worker_id));
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Queue worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_constructors() {
        assert_eq!(Evaluation::approved().outcome, ModerationOutcome::Approved);
        let rejected = Evaluation::rejected("off topic");
        assert_eq!(rejected.outcome, ModerationOutcome::Rejected);
        assert_eq!(rejected.feedback.as_deref(), Some("off topic"));
        assert_eq!(
            Evaluation::violation("spam").outcome,
            ModerationOutcome::Violation
        );
    }

    #[test]
    fn test_screening_error_messages() {
        assert_eq!(
            ScreeningError::TimedOut(Duration::from_secs(2)).to_string(),
            "Screening timed out after 2s"
        );
    }
}
