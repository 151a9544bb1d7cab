//! # Content Status Machine
//!
//! Drives topics, posts and private messages from their submitted status to a decision.
//!
//! ```text
//! Topic:          pending_approval -> approved | rejected
//! Post:           submitted -(tos_screening)-> in_transit -(post_moderation)-> approved | rejected
//!                 submitted -(tos_screening)-> tos_violation
//! PrivateMessage: submitted -> approved | rejected
//! ```
//!
//! Transitions only move forward. Re-opening a decided entity is the job of an external
//! collaborator (appeals, flag disputes); [`ContentStatusMachine::apply_external_override`]
//! is the interface it uses, and the scheduler itself never calls it.

use super::errors::{invalid_transition, StateMachineResult};
use super::events::ContentEvent;
use super::guards;
use super::persistence::{ContentTransitionPersistence, PendingTransition};
use super::states::{ContentStatus, PostStatus, PrivateMessageStatus, TopicStatus};
use crate::constants::{ModerationOutcome, QueueType};
use crate::error::{QueueError, Result};
use crate::models::{ContentRef, ContentStatusTransition};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

/// Result of applying an event to a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed {
        from: ContentStatus,
        to: ContentStatus,
    },
    /// The entity already carries the target status (replayed decision)
    Unchanged(ContentStatus),
}

impl Transition {
    pub fn status(&self) -> ContentStatus {
        match self {
            Self::Changed { to, .. } => *to,
            Self::Unchanged(status) => *status,
        }
    }
}

/// What a decision did to the content
#[derive(Debug, Clone)]
pub struct AppliedDecision {
    pub status: ContentStatus,
    /// Audit row, present only if the status actually changed
    pub transition: Option<ContentStatusTransition>,
}

pub struct ContentStatusMachine;

impl ContentStatusMachine {
    /// Status the content must hold while `queue_type` is still deciding it
    pub fn pre_decision_status(queue_type: QueueType) -> ContentStatus {
        match queue_type {
            QueueType::TopicCreation => ContentStatus::Topic(TopicStatus::PendingApproval),
            QueueType::TosScreening => ContentStatus::Post(PostStatus::Submitted),
            QueueType::PostModeration => ContentStatus::Post(PostStatus::InTransit),
            QueueType::PrivateMessage => {
                ContentStatus::PrivateMessage(PrivateMessageStatus::Submitted)
            }
        }
    }

    /// Status a decision of `queue_type` moves the content to
    pub fn decision_target(queue_type: QueueType, outcome: ModerationOutcome) -> ContentStatus {
        let approved = outcome == ModerationOutcome::Approved;
        match queue_type {
            QueueType::TopicCreation => ContentStatus::Topic(if approved {
                TopicStatus::Approved
            } else {
                TopicStatus::Rejected
            }),
            QueueType::TosScreening => ContentStatus::Post(if approved {
                PostStatus::InTransit
            } else {
                PostStatus::TosViolation
            }),
            QueueType::PostModeration => ContentStatus::Post(if approved {
                PostStatus::Approved
            } else {
                PostStatus::Rejected
            }),
            QueueType::PrivateMessage => ContentStatus::PrivateMessage(if approved {
                PrivateMessageStatus::Approved
            } else {
                PrivateMessageStatus::Rejected
            }),
        }
    }

    /// Outcome a queue of `queue_type` must have reached for the content to sit at `status`.
    ///
    /// `None` while the content is still at the pre-decision status (or never reached this
    /// queue). Used by reconciliation to close queue items the content has moved past.
    pub fn implied_outcome(
        queue_type: QueueType,
        status: ContentStatus,
    ) -> Option<ModerationOutcome> {
        match (queue_type, status) {
            (QueueType::TopicCreation, ContentStatus::Topic(TopicStatus::Approved))
            | (QueueType::PostModeration, ContentStatus::Post(PostStatus::Approved))
            | (
                QueueType::PrivateMessage,
                ContentStatus::PrivateMessage(PrivateMessageStatus::Approved),
            ) => Some(ModerationOutcome::Approved),
            (QueueType::TopicCreation, ContentStatus::Topic(TopicStatus::Rejected))
            | (QueueType::PostModeration, ContentStatus::Post(PostStatus::Rejected))
            | (
                QueueType::PrivateMessage,
                ContentStatus::PrivateMessage(PrivateMessageStatus::Rejected),
            ) => Some(ModerationOutcome::Rejected),
            (
                QueueType::TosScreening,
                ContentStatus::Post(PostStatus::InTransit | PostStatus::Approved | PostStatus::Rejected),
            ) => Some(ModerationOutcome::Approved),
            (QueueType::TosScreening, ContentStatus::Post(PostStatus::TosViolation)) => {
                Some(ModerationOutcome::Violation)
            }
            _ => None,
        }
    }

    /// Pure transition function
    pub fn transition(current: ContentStatus, event: &ContentEvent) -> StateMachineResult<Transition> {
        match event {
            ContentEvent::Decided {
                queue_type,
                outcome,
            } => {
                guards::check_queue_serves(*queue_type, current.content_type())?;
                let target = Self::decision_target(*queue_type, *outcome);
                if current == target {
                    Ok(Transition::Unchanged(current))
                } else if current == Self::pre_decision_status(*queue_type) {
                    Ok(Transition::Changed {
                        from: current,
                        to: target,
                    })
                } else {
                    Err(invalid_transition(current.as_str(), target.as_str()))
                }
            }
            ContentEvent::ExternalOverride { target, .. } => {
                guards::check_override(current, *target)?;
                Ok(Transition::Changed {
                    from: current,
                    to: *target,
                })
            }
        }
    }

    /// Apply a queue decision on the caller's connection (inside the finalize transaction)
    #[instrument(skip(conn, feedback), fields(content_type = %content.content_type, content_pk = %content.content_pk))]
    pub async fn apply_decision(
        conn: &mut SqliteConnection,
        content: ContentRef,
        queue_type: QueueType,
        outcome: ModerationOutcome,
        queue_item_id: i64,
        feedback: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<AppliedDecision> {
        let current = ContentTransitionPersistence::current_status(
            conn,
            content.content_type,
            content.content_pk,
        )
        .await?
        .ok_or(QueueError::ContentNotFound {
            content_type: content.content_type.to_string(),
            content_pk: content.content_pk,
        })?;

        let event = ContentEvent::decided(queue_type, outcome);
        match Self::transition(current, &event)? {
            Transition::Unchanged(status) => {
                debug!(status = %status, "Content already carries the decision");
                if let Some(feedback) = feedback {
                    ContentTransitionPersistence::record_feedback(
                        conn,
                        content.content_type,
                        content.content_pk,
                        feedback,
                        at,
                    )
                    .await?;
                }
                Ok(AppliedDecision {
                    status,
                    transition: None,
                })
            }
            Transition::Changed { from, to } => {
                let reason = event.reason();
                let transition = ContentTransitionPersistence::persist(
                    conn,
                    PendingTransition {
                        content_pk: content.content_pk,
                        from,
                        to,
                        queue_item_id: Some(queue_item_id),
                        reason: &reason,
                        feedback,
                        at,
                    },
                )
                .await?;
                Ok(AppliedDecision {
                    status: to,
                    transition: Some(transition),
                })
            }
        }
    }

    /// Move a decided entity to another status on behalf of an external collaborator.
    ///
    /// The source status is read first and the write is guarded on it, so a concurrent
    /// change makes this call fail instead of overwriting.
    #[instrument(skip(pool), fields(content_type = %content.content_type, content_pk = %content.content_pk))]
    pub async fn apply_external_override(
        pool: &SqlitePool,
        content: ContentRef,
        target: ContentStatus,
        reason: &str,
    ) -> Result<ContentStatusTransition> {
        let mut conn = pool.acquire().await?;
        let current = ContentTransitionPersistence::current_status(
            &mut *conn,
            content.content_type,
            content.content_pk,
        )
        .await?
        .ok_or(QueueError::ContentNotFound {
            content_type: content.content_type.to_string(),
            content_pk: content.content_pk,
        })?;
        drop(conn);

        let event = ContentEvent::ExternalOverride {
            target,
            reason: reason.to_string(),
        };
        let Transition::Changed { from, to } = Self::transition(current, &event)? else {
            return Err(invalid_transition(current.as_str(), target.as_str()).into());
        };

        let audit_reason = event.reason();
        let mut tx = pool.begin().await?;
        let transition = ContentTransitionPersistence::persist(
            &mut *tx,
            PendingTransition {
                content_pk: content.content_pk,
                from,
                to,
                queue_item_id: None,
                reason: &audit_reason,
                feedback: None,
                at: Utc::now(),
            },
        )
        .await?;
        tx.commit().await?;

        Ok(transition)
    }
}
