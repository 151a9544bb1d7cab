//! # Coordinator
//!
//! Read-only views over all four queues for dashboards and the public queue overview.
//! Nothing in this module writes to the store.

use super::position::{ItemPosition, PartitionSummary, PositionCalculator, QueueStats};
use super::store::QueueStore;
use crate::constants::system::DASHBOARD_EXCERPT_CHARS;
use crate::constants::{QueueStatus, QueueType};
use crate::error::Result;
use crate::models::queue_item::QUEUE_ITEM_COLUMNS;
use crate::models::QueueItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;
use uuid::Uuid;

/// Stats of every queue type at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOverview {
    pub generated_at: DateTime<Utc>,
    pub queues: Vec<QueueStats>,
}

impl QueueOverview {
    pub fn for_queue(&self, queue_type: QueueType) -> Option<&QueueStats> {
        self.queues.iter().find(|stats| stats.queue_type == queue_type)
    }

    pub fn total_pending(&self) -> i64 {
        self.queues.iter().map(|stats| stats.pending_count).sum()
    }
}

/// Where a content entity stands in the queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContentPosition {
    Queued(ItemPosition),
    InProgress {
        item_id: i64,
        queue_type: QueueType,
        worker: Option<String>,
    },
    NotQueued,
}

impl ContentPosition {
    /// 1-based rank while queued
    pub fn rank(&self) -> Option<i64> {
        match self {
            Self::Queued(position) => Some(position.position),
            _ => None,
        }
    }
}

/// A queue row joined with the content it carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEntry {
    #[serde(flatten)]
    pub item: QueueItem,
    pub title: Option<String>,
    pub author_id: Option<Uuid>,
    pub excerpt: Option<String>,
    pub content_status: Option<String>,
}

#[derive(Debug, FromRow)]
struct DashboardRow {
    #[sqlx(flatten)]
    item: QueueItem,
    title: Option<String>,
    author_id: Option<Uuid>,
    body: Option<String>,
    content_status: Option<String>,
}

/// Cut `body` to at most `max_chars` characters, marking the cut with an ellipsis
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let body = body.trim();
    match body.char_indices().nth(max_chars) {
        None => body.to_string(),
        Some((cut, _)) => format!("{}…", body[..cut].trim_end()),
    }
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    store: QueueStore,
    positions: PositionCalculator,
}

impl Coordinator {
    pub fn new(store: QueueStore, positions: PositionCalculator) -> Self {
        Self { store, positions }
    }

    /// Stats for all four queue types. Empty queues report zeroes.
    #[instrument(skip(self))]
    pub async fn overview(&self) -> Result<QueueOverview> {
        let mut queues = Vec::with_capacity(QueueType::ALL.len());
        for queue_type in QueueType::ALL {
            queues.push(self.positions.queue_stats(queue_type).await?);
        }
        Ok(QueueOverview {
            generated_at: Utc::now(),
            queues,
        })
    }

    /// Position of a content entity: its pending item's rank, the worker holding it, or
    /// not queued at all
    #[instrument(skip(self))]
    pub async fn position(&self, content_pk: Uuid) -> Result<ContentPosition> {
        let active = self.store.find_active_by_content(content_pk).await?;

        if let Some(pending) = active.iter().find(|item| item.status == QueueStatus::Pending) {
            if let Some(position) = self.positions.position_of(pending).await? {
                return Ok(ContentPosition::Queued(position));
            }
        }

        Ok(active
            .into_iter()
            .find(|item| item.status == QueueStatus::Processing)
            .map(|item| ContentPosition::InProgress {
                item_id: item.id,
                queue_type: item.queue_type,
                worker: item.assigned_worker,
            })
            .unwrap_or(ContentPosition::NotQueued))
    }

    /// Active rows of a queue with content title, author and excerpt.
    /// Processing rows come first, then pending rows by partition in serving order.
    #[instrument(skip(self))]
    pub async fn dashboard(
        &self,
        queue_type: QueueType,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DashboardEntry>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_ITEM_COLUMNS},
                   COALESCE(t.title, pt.title) AS title,
                   COALESCE(t.author_id, p.author_id, m.sender_id) AS author_id,
                   COALESCE(t.body, p.body, m.body) AS body,
                   COALESCE(t.status, p.status, m.status) AS content_status
            FROM queue_items q
            LEFT JOIN topics t ON q.content_type = 'topic' AND t.id = q.content_pk
            LEFT JOIN posts p ON q.content_type = 'post' AND p.id = q.content_pk
            LEFT JOIN topics pt ON pt.id = p.topic_id
            LEFT JOIN private_messages m
                ON q.content_type = 'private_message' AND m.id = q.content_pk
            WHERE q.queue_type = ? AND q.status IN ('pending', 'processing')
            ORDER BY CASE q.status WHEN 'processing' THEN 0 ELSE 1 END,
                     q.partition_key ASC,
                     q.priority_score DESC, q.entered_queue_at ASC, q.id ASC
            LIMIT ? OFFSET ?
            "#
        );

        let rows = sqlx::query_as::<_, DashboardRow>(&sql)
            .bind(queue_type)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.store.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| DashboardEntry {
                item: row.item,
                title: row.title,
                author_id: row.author_id,
                excerpt: row.body.map(|body| excerpt(&body, DASHBOARD_EXCERPT_CHARS)),
                content_status: row.content_status,
            })
            .collect())
    }

    /// Failed items waiting for a human
    pub async fn manual_review(&self, limit: i64) -> Result<Vec<QueueItem>> {
        self.store.list_manual_review(limit).await
    }

    pub async fn partition_summaries(
        &self,
        queue_type: QueueType,
        limit: i64,
    ) -> Result<Vec<PartitionSummary>> {
        self.positions.partition_summaries(queue_type, limit).await
    }

    pub async fn queue_stats(&self, queue_type: QueueType) -> Result<QueueStats> {
        self.positions.queue_stats(queue_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_is_kept() {
        assert_eq!(excerpt("  hello world ", 140), "hello world");
    }

    #[test]
    fn test_long_body_is_cut_on_char_boundary() {
        let body = "é".repeat(10);
        assert_eq!(excerpt(&body, 4), "éééé…");
    }

    #[test]
    fn test_not_queued_has_no_rank() {
        assert_eq!(ContentPosition::NotQueued.rank(), None);
        let in_progress = ContentPosition::InProgress {
            item_id: 1,
            queue_type: QueueType::TopicCreation,
            worker: Some("w".to_string()),
        };
        assert_eq!(in_progress.rank(), None);
    }
}
