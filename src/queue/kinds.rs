//! Queue kinds.
//!
//! The four queues share one item shape and one store. What differs per kind is captured
//! here: which content type it serves, how the partition key is derived from that content,
//! and which queue (if any) receives the content after a successful decision.

use crate::constants::system::{DEFAULT_PRIORITY, GLOBAL_PARTITION, MAX_PRIORITY, MIN_PRIORITY};
use crate::constants::{ContentType, ModerationOutcome, QueueType};
use crate::error::{QueueError, Result};
use crate::models::{Content, NewQueueItem, QueueItem};
use uuid::Uuid;

/// How a queue derives partition keys from its content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    /// Every item shares the `global` partition
    Global,
    /// One partition per topic
    Topic,
    /// One partition per pair of users, independent of direction
    Conversation,
}

/// Static description of one queue kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKind {
    pub queue_type: QueueType,
    pub content_type: ContentType,
    pub partition: PartitionScheme,
    /// Queue that receives the content when this queue approves it
    pub next_on_success: Option<QueueType>,
}

impl QueueKind {
    pub const fn of(queue_type: QueueType) -> QueueKind {
        match queue_type {
            QueueType::TopicCreation => QueueKind {
                queue_type,
                content_type: ContentType::Topic,
                partition: PartitionScheme::Global,
                next_on_success: None,
            },
            QueueType::TosScreening => QueueKind {
                queue_type,
                content_type: ContentType::Post,
                partition: PartitionScheme::Global,
                next_on_success: Some(QueueType::PostModeration),
            },
            QueueType::PostModeration => QueueKind {
                queue_type,
                content_type: ContentType::Post,
                partition: PartitionScheme::Topic,
                next_on_success: None,
            },
            QueueType::PrivateMessage => QueueKind {
                queue_type,
                content_type: ContentType::PrivateMessage,
                partition: PartitionScheme::Conversation,
                next_on_success: None,
            },
        }
    }

    /// Queue a freshly submitted entity of this content type enters first
    pub fn entry_queue(content_type: ContentType) -> QueueType {
        match content_type {
            ContentType::Topic => QueueType::TopicCreation,
            ContentType::Post => QueueType::TosScreening,
            ContentType::PrivateMessage => QueueType::PrivateMessage,
        }
    }

    /// Derive the partition key for `content` in this queue
    pub fn partition_for(&self, content: &Content) -> Result<String> {
        if content.content_type != self.content_type {
            return Err(QueueError::Validation(format!(
                "{} queue does not accept {} content",
                self.queue_type, content.content_type
            )));
        }
        match self.partition {
            PartitionScheme::Global => Ok(GLOBAL_PARTITION.to_string()),
            PartitionScheme::Topic => content.parent_pk.map(topic_partition).ok_or_else(|| {
                QueueError::Validation(format!("post {} has no topic", content.id))
            }),
            PartitionScheme::Conversation => content
                .recipient_id
                .map(|recipient| conversation_partition(content.author_id, recipient))
                .ok_or_else(|| {
                    QueueError::Validation(format!("message {} has no recipient", content.id))
                }),
        }
    }

    /// The item to enqueue after `item` is finalized with `outcome`, if any
    pub fn chained_item(item: &QueueItem, outcome: ModerationOutcome) -> Option<NewQueueItem> {
        if outcome != ModerationOutcome::Approved {
            return None;
        }
        let next = QueueKind::of(item.queue_type).next_on_success?;
        match QueueKind::of(next).partition {
            PartitionScheme::Topic => item.parent_pk.map(|topic_pk| NewQueueItem {
                queue_type: next,
                content_type: item.content_type,
                content_pk: item.content_pk,
                parent_pk: Some(topic_pk),
                partition_key: topic_partition(topic_pk),
                priority_score: item.priority_score,
            }),
            PartitionScheme::Global => Some(NewQueueItem {
                queue_type: next,
                content_type: item.content_type,
                content_pk: item.content_pk,
                parent_pk: item.parent_pk,
                partition_key: GLOBAL_PARTITION.to_string(),
                priority_score: item.priority_score,
            }),
            PartitionScheme::Conversation => None,
        }
    }
}

/// Partition key of a topic's post-moderation queue
pub fn topic_partition(topic_pk: Uuid) -> String {
    format!("topic:{topic_pk}")
}

/// Partition key of the conversation between two users, in either direction
pub fn conversation_partition(user_a: Uuid, user_b: Uuid) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("conversation:users_{low}_{high}")
}

/// Reject priority scores outside 0..=100
pub fn validate_priority(priority_score: i64) -> Result<i64> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority_score) {
        Ok(priority_score)
    } else {
        Err(QueueError::InvalidPriority(priority_score))
    }
}

impl NewQueueItem {
    pub fn topic_creation(topic_pk: Uuid, priority_score: Option<i64>) -> Self {
        Self {
            queue_type: QueueType::TopicCreation,
            content_type: ContentType::Topic,
            content_pk: topic_pk,
            parent_pk: None,
            partition_key: GLOBAL_PARTITION.to_string(),
            priority_score: priority_score.unwrap_or(DEFAULT_PRIORITY),
        }
    }

    pub fn tos_screening(post_pk: Uuid, topic_pk: Uuid, priority_score: Option<i64>) -> Self {
        Self {
            queue_type: QueueType::TosScreening,
            content_type: ContentType::Post,
            content_pk: post_pk,
            parent_pk: Some(topic_pk),
            partition_key: GLOBAL_PARTITION.to_string(),
            priority_score: priority_score.unwrap_or(DEFAULT_PRIORITY),
        }
    }

    pub fn post_moderation(post_pk: Uuid, topic_pk: Uuid, priority_score: Option<i64>) -> Self {
        Self {
            queue_type: QueueType::PostModeration,
            content_type: ContentType::Post,
            content_pk: post_pk,
            parent_pk: Some(topic_pk),
            partition_key: topic_partition(topic_pk),
            priority_score: priority_score.unwrap_or(DEFAULT_PRIORITY),
        }
    }

    pub fn private_message(
        message_pk: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
        priority_score: Option<i64>,
    ) -> Self {
        Self {
            queue_type: QueueType::PrivateMessage,
            content_type: ContentType::PrivateMessage,
            content_pk: message_pk,
            parent_pk: None,
            partition_key: conversation_partition(sender_id, recipient_id),
            priority_score: priority_score.unwrap_or(DEFAULT_PRIORITY),
        }
    }

    /// Build the item for `content` entering `queue_type`, deriving the partition key
    pub fn for_content(
        queue_type: QueueType,
        content: &Content,
        priority_score: Option<i64>,
    ) -> Result<Self> {
        let kind = QueueKind::of(queue_type);
        let partition_key = kind.partition_for(content)?;
        Ok(Self {
            queue_type,
            content_type: content.content_type,
            content_pk: content.id,
            parent_pk: content.parent_pk,
            partition_key,
            priority_score: priority_score.unwrap_or(DEFAULT_PRIORITY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_partition_is_symmetric() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        assert_eq!(
            conversation_partition(alice, bob),
            conversation_partition(bob, alice)
        );
        assert!(conversation_partition(alice, bob).starts_with("conversation:users_"));
    }

    #[test]
    fn test_priority_bounds() {
        assert_eq!(validate_priority(0).unwrap(), 0);
        assert_eq!(validate_priority(100).unwrap(), 100);
        assert!(matches!(
            validate_priority(101),
            Err(QueueError::InvalidPriority(101))
        ));
        assert!(matches!(
            validate_priority(-1),
            Err(QueueError::InvalidPriority(-1))
        ));
    }

    #[test]
    fn test_queue_kind_table() {
        assert_eq!(
            QueueKind::of(QueueType::TosScreening).next_on_success,
            Some(QueueType::PostModeration)
        );
        assert_eq!(
            QueueKind::of(QueueType::PostModeration).partition,
            PartitionScheme::Topic
        );
        assert_eq!(
            QueueKind::entry_queue(ContentType::Post),
            QueueType::TosScreening
        );
        for queue_type in QueueType::ALL {
            assert_eq!(QueueKind::of(queue_type).queue_type, queue_type);
        }
    }

    #[test]
    fn test_default_priority_applied() {
        let topic = Uuid::new_v4();
        let item = NewQueueItem::post_moderation(Uuid::new_v4(), topic, None);
        assert_eq!(item.priority_score, DEFAULT_PRIORITY);
        assert_eq!(item.partition_key, format!("topic:{topic}"));
    }
}
