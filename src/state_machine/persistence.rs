//! Persistence of content status transitions.
//!
//! A status change is two writes: the guarded update of the content row and the audit row
//! in `content_status_transitions`. Both run on the caller's connection so they share the
//! caller's transaction.

use super::errors::{StateMachineError, StateMachineResult};
use super::states::ContentStatus;
use crate::constants::ContentType;
use crate::logging::log_content_transition;
use crate::models::ContentStatusTransition;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// A status change about to be written
#[derive(Debug, Clone)]
pub struct PendingTransition<'a> {
    pub content_pk: Uuid,
    pub from: ContentStatus,
    pub to: ContentStatus,
    pub queue_item_id: Option<i64>,
    pub reason: &'a str,
    /// Replaces the stored moderation feedback when present
    pub feedback: Option<&'a str>,
    pub at: DateTime<Utc>,
}

pub struct ContentTransitionPersistence;

impl ContentTransitionPersistence {
    /// Current status of an entity, `None` if it does not exist
    pub async fn current_status(
        conn: &mut SqliteConnection,
        content_type: ContentType,
        content_pk: Uuid,
    ) -> StateMachineResult<Option<ContentStatus>> {
        let sql = format!("SELECT status FROM {} WHERE id = ?", content_type.table());
        let row = sqlx::query(&sql)
            .bind(content_pk)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(|row| {
            let status: String = row.get("status");
            ContentStatus::parse(content_type, &status).map_err(StateMachineError::Internal)
        })
        .transpose()
    }

    /// Write the status (guarded on the expected source status) and its audit row
    pub async fn persist(
        conn: &mut SqliteConnection,
        transition: PendingTransition<'_>,
    ) -> StateMachineResult<ContentStatusTransition> {
        let content_type = transition.from.content_type();
        let sql = format!(
            "UPDATE {} SET status = ?, moderation_feedback = COALESCE(?, moderation_feedback), \
             updated_at = ? WHERE id = ? AND status = ?",
            content_type.table()
        );

        let updated = sqlx::query(&sql)
            .bind(transition.to.as_str())
            .bind(transition.feedback)
            .bind(transition.at)
            .bind(transition.content_pk)
            .bind(transition.from.as_str())
            .execute(&mut *conn)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(StateMachineError::PersistenceFailed {
                reason: format!(
                    "{content_type} {} is no longer '{}'",
                    transition.content_pk, transition.from
                ),
            });
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO content_status_transitions
                (content_type, content_pk, from_status, to_status, queue_item_id, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(content_type)
        .bind(transition.content_pk)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.queue_item_id)
        .bind(transition.reason)
        .bind(transition.at)
        .fetch_one(&mut *conn)
        .await?;

        log_content_transition(
            content_type.as_str(),
            &transition.content_pk.to_string(),
            transition.from.as_str(),
            transition.to.as_str(),
            transition.reason,
        );

        Ok(ContentStatusTransition {
            id,
            content_type,
            content_pk: transition.content_pk,
            from_status: transition.from.as_str().to_string(),
            to_status: transition.to.as_str().to_string(),
            queue_item_id: transition.queue_item_id,
            reason: transition.reason.to_string(),
            created_at: transition.at,
        })
    }

    /// Whether a status change caused by `queue_item_id` was ever recorded
    pub async fn recorded_for_item(
        conn: &mut SqliteConnection,
        queue_item_id: i64,
    ) -> StateMachineResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM content_status_transitions WHERE queue_item_id = ?",
        )
        .bind(queue_item_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    /// Store feedback without changing the status
    pub async fn record_feedback(
        conn: &mut SqliteConnection,
        content_type: ContentType,
        content_pk: Uuid,
        feedback: &str,
        at: DateTime<Utc>,
    ) -> StateMachineResult<()> {
        let sql = format!(
            "UPDATE {} SET moderation_feedback = ?, updated_at = ? WHERE id = ?",
            content_type.table()
        );
        sqlx::query(&sql)
            .bind(feedback)
            .bind(at)
            .bind(content_pk)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
