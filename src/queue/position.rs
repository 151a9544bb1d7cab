//! # Position Calculator
//!
//! Ranks and aggregates pending work. Nothing here is stored: ranks and statistics are
//! computed on demand from the live `queue_items` rows, the same way every item read
//! computes its position.
//!
//! ## Ordering
//!
//! Inside a partition items are served by `priority_score` descending, then by entry time
//! ascending (FIFO among equal priority), then by id. [`ServingKey`] is the in-memory form of
//! that order and must agree with the SQL form used by the store.
//!
//! ## Estimates
//!
//! The estimated wait of a pending item is `pending_ahead * average_processing_seconds`,
//! where the average covers items completed inside the configured recent window and falls
//! back to the configured default when nothing completed recently.

use crate::config::EstimationConfig;
use crate::constants::QueueType;
use crate::error::Result;
use crate::models::QueueItem;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::cmp::Ordering;
use tracing::instrument;

/// Sort key of a pending item inside its partition. `Ord` follows serving order, so the
/// smallest key is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServingKey {
    pub priority_score: i64,
    pub entered_queue_at: DateTime<Utc>,
    pub id: i64,
}

impl Ord for ServingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority_score
            .cmp(&self.priority_score)
            .then_with(|| self.entered_queue_at.cmp(&other.entered_queue_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ServingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&QueueItem> for ServingKey {
    fn from(item: &QueueItem) -> Self {
        Self {
            priority_score: item.priority_score,
            entered_queue_at: item.entered_queue_at,
            id: item.id,
        }
    }
}

/// 1-based rank of `target` among `keys`, or `None` if it is not one of them
pub fn rank_of(keys: &[ServingKey], target: &ServingKey) -> Option<i64> {
    if !keys.contains(target) {
        return None;
    }
    let ahead = keys.iter().filter(|key| *key < target).count();
    Some(ahead as i64 + 1)
}

/// Seconds until an item at `position` is likely to be picked up
pub fn estimated_wait_seconds(position: i64, average_processing_seconds: f64) -> f64 {
    (position.max(1) - 1) as f64 * average_processing_seconds
}

/// Aggregates of one partition, or of a whole queue type when `partition_key` is `None`.
/// An empty scope yields zeroes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_type: QueueType,
    pub partition_key: Option<String>,
    pub pending_count: i64,
    pub processing_count: i64,
    pub average_wait_seconds: f64,
    pub oldest_wait_seconds: f64,
    pub average_processing_seconds: f64,
    /// Wait a newly enqueued item would face at the back of this scope
    pub estimated_wait_seconds: f64,
}

#[derive(Debug, FromRow)]
struct StatsRow {
    pending_count: i64,
    processing_count: i64,
    average_wait_seconds: Option<f64>,
    oldest_wait_seconds: Option<f64>,
}

/// Pending work of one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PartitionSummary {
    pub partition_key: String,
    pub pending_count: i64,
    pub processing_count: i64,
    pub oldest_entered_at: Option<DateTime<Utc>>,
}

/// Live rank of a pending item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPosition {
    pub item_id: i64,
    pub queue_type: QueueType,
    pub partition_key: String,
    pub position: i64,
    pub total_pending: i64,
    pub estimated_wait_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct PositionCalculator {
    pool: SqlitePool,
    estimation: EstimationConfig,
}

impl PositionCalculator {
    pub fn new(pool: SqlitePool, estimation: EstimationConfig) -> Self {
        Self { pool, estimation }
    }

    /// Mean seconds between claim and completion over the recent window
    pub async fn average_processing_seconds(&self, queue_type: QueueType) -> Result<f64> {
        let since = Utc::now() - ChronoDuration::minutes(self.estimation.completion_window_minutes);
        let average: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG((julianday(completed_at) - julianday(started_processing_at)) * 86400.0)
            FROM queue_items
            WHERE queue_type = ? AND status = 'completed'
              AND started_processing_at IS NOT NULL AND completed_at >= ?
            "#,
        )
        .bind(queue_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(average
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .unwrap_or(self.estimation.default_processing_seconds))
    }

    async fn stats(&self, queue_type: QueueType, partition_key: Option<&str>) -> Result<QueueStats> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending_count,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing_count,
                AVG(CASE WHEN status = 'pending'
                    THEN (julianday(?) - julianday(entered_queue_at)) * 86400.0 END) AS average_wait_seconds,
                MAX(CASE WHEN status = 'pending'
                    THEN (julianday(?) - julianday(entered_queue_at)) * 86400.0 END) AS oldest_wait_seconds
            FROM queue_items
            WHERE queue_type = ? AND (? IS NULL OR partition_key = ?)
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(queue_type)
        .bind(partition_key)
        .bind(partition_key)
        .fetch_one(&self.pool)
        .await?;

        let average_processing_seconds = self.average_processing_seconds(queue_type).await?;
        Ok(QueueStats {
            queue_type,
            partition_key: partition_key.map(str::to_string),
            pending_count: row.pending_count,
            processing_count: row.processing_count,
            average_wait_seconds: row.average_wait_seconds.unwrap_or(0.0).max(0.0),
            oldest_wait_seconds: row.oldest_wait_seconds.unwrap_or(0.0).max(0.0),
            average_processing_seconds,
            estimated_wait_seconds: estimated_wait_seconds(
                row.pending_count + 1,
                average_processing_seconds,
            ),
        })
    }

    /// Aggregates of one partition
    #[instrument(skip(self))]
    pub async fn partition_stats(
        &self,
        queue_type: QueueType,
        partition_key: &str,
    ) -> Result<QueueStats> {
        self.stats(queue_type, Some(partition_key)).await
    }

    /// Aggregates of a queue type across all its partitions
    #[instrument(skip(self))]
    pub async fn queue_stats(&self, queue_type: QueueType) -> Result<QueueStats> {
        self.stats(queue_type, None).await
    }

    /// Live position of a pending item; `None` if the item is missing or not pending
    pub async fn position_of(&self, item: &QueueItem) -> Result<Option<ItemPosition>> {
        let Some(position) = item.position_in_queue else {
            return Ok(None);
        };

        let total_pending: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM queue_items
            WHERE queue_type = ? AND partition_key = ? AND status = 'pending'
            "#,
        )
        .bind(item.queue_type)
        .bind(&item.partition_key)
        .fetch_one(&self.pool)
        .await?;

        let average = self.average_processing_seconds(item.queue_type).await?;
        Ok(Some(ItemPosition {
            item_id: item.id,
            queue_type: item.queue_type,
            partition_key: item.partition_key.clone(),
            position,
            total_pending,
            estimated_wait_seconds: estimated_wait_seconds(position, average),
        }))
    }

    /// Partitions of a queue type with the most pending work first
    pub async fn partition_summaries(
        &self,
        queue_type: QueueType,
        limit: i64,
    ) -> Result<Vec<PartitionSummary>> {
        let summaries = sqlx::query_as::<_, PartitionSummary>(
            r#"
            SELECT partition_key,
                   SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending_count,
                   SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) AS processing_count,
                   MIN(CASE WHEN status = 'pending' THEN entered_queue_at END) AS oldest_entered_at
            FROM queue_items
            WHERE queue_type = ? AND status IN ('pending', 'processing')
            GROUP BY partition_key
            ORDER BY pending_count DESC, oldest_entered_at ASC, partition_key ASC
            LIMIT ?
            "#,
        )
        .bind(queue_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(priority_score: i64, offset_ms: i64, id: i64) -> ServingKey {
        let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ServingKey {
            priority_score,
            entered_queue_at: base + ChronoDuration::milliseconds(offset_ms),
            id,
        }
    }

    #[test]
    fn test_higher_priority_ranks_first_despite_later_entry() {
        let early_normal = key(50, 0, 1);
        let late_urgent = key(80, 1000, 2);
        let keys = [early_normal, late_urgent];
        assert_eq!(rank_of(&keys, &late_urgent), Some(1));
        assert_eq!(rank_of(&keys, &early_normal), Some(2));
    }

    #[test]
    fn test_fifo_among_equal_priority() {
        let first = key(50, 0, 7);
        let second = key(50, 10, 3);
        assert!(first < second);
    }

    #[test]
    fn test_rank_of_missing_key() {
        assert_eq!(rank_of(&[key(50, 0, 1)], &key(50, 0, 2)), None);
    }

    #[test]
    fn test_estimate_counts_items_ahead() {
        assert_eq!(estimated_wait_seconds(1, 30.0), 0.0);
        assert_eq!(estimated_wait_seconds(4, 30.0), 90.0);
        assert_eq!(estimated_wait_seconds(0, 30.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_ranks_are_a_permutation(
            entries in prop::collection::vec((0i64..=100, 0i64..10_000), 1..40)
        ) {
            let keys: Vec<ServingKey> = entries
                .iter()
                .enumerate()
                .map(|(i, (priority, offset))| key(*priority, *offset, i as i64 + 1))
                .collect();

            let mut ranks: Vec<i64> = keys.iter().filter_map(|k| rank_of(&keys, k)).collect();
            ranks.sort_unstable();
            let expected: Vec<i64> = (1..=keys.len() as i64).collect();
            prop_assert_eq!(ranks, expected);
        }

        #[test]
        fn prop_higher_priority_always_ahead(
            entries in prop::collection::vec((0i64..=100, 0i64..10_000), 2..40)
        ) {
            let keys: Vec<ServingKey> = entries
                .iter()
                .enumerate()
                .map(|(i, (priority, offset))| key(*priority, *offset, i as i64 + 1))
                .collect();

            for a in &keys {
                for b in &keys {
                    if a.priority_score > b.priority_score {
                        prop_assert!(rank_of(&keys, a) < rank_of(&keys, b));
                    }
                    if a.priority_score == b.priority_score && a.entered_queue_at < b.entered_queue_at {
                        prop_assert!(rank_of(&keys, a) < rank_of(&keys, b));
                    }
                }
            }
        }
    }
}
