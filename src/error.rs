//! Error types for the moderation queue scheduler.

use crate::config::ConfigurationError;
use crate::constants::{ItemOutcome, QueueStatus, QueueType};
use crate::state_machine::StateMachineError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The content already owns a non-terminal item in this queue type.
    #[error("Content {content_pk} already has an active item in the {queue_type} queue")]
    DuplicateEnqueue { queue_type: QueueType, content_pk: Uuid },

    /// Lost the guarded PENDING -> PROCESSING update. Never surfaced by the claimer.
    #[error("Queue item {item_id} is no longer pending (status: {current_status})")]
    AlreadyClaimed {
        item_id: i64,
        current_status: QueueStatus,
    },

    #[error("Queue item {0} not found")]
    NotFound(i64),

    #[error("Content {content_type} {content_pk} not found")]
    ContentNotFound {
        content_type: String,
        content_pk: Uuid,
    },

    #[error("Queue item {item_id} is {status} and cannot be withdrawn")]
    NotCancellable { item_id: i64, status: QueueStatus },

    #[error("Queue item {item_id} was already finalized as {recorded}, refusing {requested}")]
    ConflictingOutcome {
        item_id: i64,
        recorded: ItemOutcome,
        requested: ItemOutcome,
    },

    #[error("Priority score {0} is outside 0..=100")]
    InvalidPriority(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ) || is_busy(err),
            _ => false,
        }
    }
}

/// SQLite reports lock contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6).
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, 5 | 6))
        .unwrap_or(false)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let id = Uuid::nil();
        let err = QueueError::DuplicateEnqueue {
            queue_type: QueueType::PostModeration,
            content_pk: id,
        };
        assert_eq!(
            err.to_string(),
            format!("Content {id} already has an active item in the post_moderation queue")
        );

        let err = QueueError::NotCancellable {
            item_id: 7,
            status: QueueStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "Queue item 7 is processing and cannot be withdrawn"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(QueueError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!QueueError::NotFound(1).is_transient());
        assert!(!QueueError::InvalidPriority(101).is_transient());
    }
}
