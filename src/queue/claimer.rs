//! # Claimer
//!
//! Hands pending items to workers under a lease.
//!
//! ## Atomic Claiming
//!
//! A claim is one guarded statement in the store: the eligible
//! candidate is chosen and moved to `processing` by the same `UPDATE`, so two workers can
//! never both receive an item. A caller that loses a race retries against the next
//! candidate, bounded by `claim.max_attempts`; losing every attempt yields an empty result,
//! never an error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use moderation_queue::constants::QueueType;
//! use moderation_queue::queue::Claimer;
//!
//! # async fn example(claimer: Claimer) -> moderation_queue::Result<()> {
//! if let Some(item) = claimer
//!     .claim_next(QueueType::PostModeration, Some("topic:abc"), Some("worker-1"))
//!     .await?
//! {
//!     // evaluate, then finalize
//!     claimer.extend_lease(item.id, "worker-1").await?;
//! }
//! # Ok(())
//! # }
//! ```

use super::store::QueueStore;
use crate::config::ClaimConfig;
use crate::constants::{events, QueueType};
use crate::error::{is_busy, QueueError, Result};
use crate::logging::log_queue_operation;
use crate::models::QueueItem;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Pause before retrying a claim that hit store lock contention
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct Claimer {
    store: QueueStore,
    config: ClaimConfig,
}

impl Claimer {
    pub fn new(store: QueueStore, config: ClaimConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    /// Claim the next eligible item of one partition.
    ///
    /// Without a `worker_id` this is a non-mutating peek at the item a claim would take.
    /// An empty partition is `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn claim_next(
        &self,
        queue_type: QueueType,
        partition_key: Option<&str>,
        worker_id: Option<&str>,
    ) -> Result<Option<QueueItem>> {
        match worker_id {
            None => self.store.peek_next(queue_type, partition_key).await,
            Some(worker_id) => self.claim(queue_type, partition_key, worker_id).await,
        }
    }

    /// Claim the next eligible item across every partition of a queue type
    pub async fn claim_next_in_queue(
        &self,
        queue_type: QueueType,
        worker_id: &str,
    ) -> Result<Option<QueueItem>> {
        self.claim(queue_type, None, worker_id).await
    }

    async fn claim(
        &self,
        queue_type: QueueType,
        partition_key: Option<&str>,
        worker_id: &str,
    ) -> Result<Option<QueueItem>> {
        for attempt in 1..=self.config.max_attempts {
            let claimed = match self
                .store
                .claim_first_eligible(queue_type, partition_key, worker_id)
                .await
            {
                Ok(claimed) => claimed,
                Err(QueueError::Database(err)) if is_busy(&err) => {
                    debug!(attempt, "Store busy while claiming, retrying");
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let Some(item_id) = claimed else {
                // Either nothing is eligible or a competing claim took the candidate
                if self.store.count_eligible(queue_type, partition_key).await? == 0 {
                    return Ok(None);
                }
                debug!(attempt, "Lost claim race, retrying against next candidate");
                continue;
            };

            let Some(item) = self.store.get(item_id).await? else {
                return Err(QueueError::NotFound(item_id));
            };

            log_queue_operation(
                "claim",
                item.queue_type.as_str(),
                Some(item.id),
                Some(&item.partition_key),
                item.status.as_str(),
                Some(&format!("worker={worker_id} attempt={attempt}")),
            );
            let _ = self
                .store
                .events()
                .publish_item(events::ITEM_CLAIMED, &item)
                .await;
            return Ok(Some(item));
        }

        warn!(
            queue_type = %queue_type,
            partition_key = partition_key.unwrap_or("*"),
            max_attempts = self.config.max_attempts,
            "Claim attempts exhausted under contention"
        );
        Ok(None)
    }

    /// Claim one specific item. Losing the race is reported as `None`.
    pub async fn claim_item(&self, item_id: i64, worker_id: &str) -> Result<Option<QueueItem>> {
        match self.store.mark_processing(item_id, worker_id).await {
            Ok(item) => {
                let _ = self
                    .store
                    .events()
                    .publish_item(events::ITEM_CLAIMED, &item)
                    .await;
                Ok(Some(item))
            }
            Err(QueueError::AlreadyClaimed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Heartbeat; `false` means the lease was lost (expired and requeued, or finalized)
    pub async fn extend_lease(&self, item_id: i64, worker_id: &str) -> Result<bool> {
        let extended = self.store.touch_lease(item_id, worker_id).await?;
        if !extended {
            warn!(item_id, worker_id, "Lease no longer held, not extended");
        }
        Ok(extended)
    }
}
