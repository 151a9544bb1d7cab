//! # System Constants
//!
//! Core enums and constants shared by every queue kind: queue item statuses, the four
//! queue types, content types and moderation outcomes, plus the lifecycle event names.
//!
//! All enums round-trip through their `snake_case` string form, which is also the form
//! persisted in the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle events published on the [`crate::events::EventPublisher`]
pub mod events {
    // Queue item lifecycle
    pub const ITEM_ENQUEUED: &str = "queue.item_enqueued";
    pub const ITEM_CLAIMED: &str = "queue.item_claimed";
    pub const ITEM_FINALIZED: &str = "queue.item_finalized";
    pub const ITEM_REQUEUED: &str = "queue.item_requeued";
    pub const ITEM_EXHAUSTED: &str = "queue.item_exhausted";
    pub const ITEM_WITHDRAWN: &str = "queue.item_withdrawn";
    pub const LEASE_EXPIRED: &str = "queue.lease_expired";

    // Content lifecycle
    pub const CONTENT_STATUS_CHANGED: &str = "content.status_changed";

    // Maintenance
    pub const RECONCILED: &str = "queue.reconciled";
}

/// System-wide constants
pub mod system {
    /// Priority assigned when the submitter does not supply one
    pub const DEFAULT_PRIORITY: i64 = 50;

    /// Inclusive bounds of a priority score
    pub const MIN_PRIORITY: i64 = 0;
    pub const MAX_PRIORITY: i64 = 100;

    /// Partition key of queues that are not scoped to a topic or conversation
    pub const GLOBAL_PARTITION: &str = "global";

    /// Longest excerpt of content text carried on dashboard rows
    pub const DASHBOARD_EXCERPT_CHARS: usize = 140;
}

/// Status of a queue item. Moves forward only, except PROCESSING -> PENDING on lease expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid queue status: {s}")),
        }
    }
}

/// The four structurally identical queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QueueType {
    TopicCreation,
    TosScreening,
    PostModeration,
    PrivateMessage,
}

impl QueueType {
    pub const ALL: [QueueType; 4] = [
        QueueType::TopicCreation,
        QueueType::TosScreening,
        QueueType::PostModeration,
        QueueType::PrivateMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopicCreation => "topic_creation",
            Self::TosScreening => "tos_screening",
            Self::PostModeration => "post_moderation",
            Self::PrivateMessage => "private_message",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic_creation" => Ok(Self::TopicCreation),
            "tos_screening" => Ok(Self::TosScreening),
            "post_moderation" => Ok(Self::PostModeration),
            "private_message" => Ok(Self::PrivateMessage),
            _ => Err(format!("Invalid queue type: {s}")),
        }
    }
}

/// Kinds of user-submitted content that flow through the queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentType {
    Topic,
    Post,
    PrivateMessage,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Post => "post",
            Self::PrivateMessage => "private_message",
        }
    }

    /// Table holding rows of this content type
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Topic => "topics",
            Self::Post => "posts",
            Self::PrivateMessage => "private_messages",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic" => Ok(Self::Topic),
            "post" => Ok(Self::Post),
            "private_message" => Ok(Self::PrivateMessage),
            _ => Err(format!("Invalid content type: {s}")),
        }
    }
}

/// Decision produced by a worker's (opaque) evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ModerationOutcome {
    Approved,
    Rejected,
    Violation,
}

impl ModerationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Violation => "violation",
        }
    }
}

impl fmt::Display for ModerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "violation" => Ok(Self::Violation),
            _ => Err(format!("Invalid moderation outcome: {s}")),
        }
    }
}

/// Outcome recorded on a terminal queue item.
///
/// Besides the three moderation decisions, the scheduler itself closes items as
/// `withdrawn` (cancelled while pending) or `exhausted` (retries used up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ItemOutcome {
    Approved,
    Rejected,
    Violation,
    Withdrawn,
    Exhausted,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Violation => "violation",
            Self::Withdrawn => "withdrawn",
            Self::Exhausted => "exhausted",
        }
    }

    /// Queue status an item takes when closed with this outcome
    pub fn terminal_status(&self) -> QueueStatus {
        match self {
            Self::Approved | Self::Rejected | Self::Violation => QueueStatus::Completed,
            Self::Withdrawn | Self::Exhausted => QueueStatus::Failed,
        }
    }

    /// The moderation decision behind this outcome, if any
    pub fn moderation(&self) -> Option<ModerationOutcome> {
        match self {
            Self::Approved => Some(ModerationOutcome::Approved),
            Self::Rejected => Some(ModerationOutcome::Rejected),
            Self::Violation => Some(ModerationOutcome::Violation),
            Self::Withdrawn | Self::Exhausted => None,
        }
    }
}

impl From<ModerationOutcome> for ItemOutcome {
    fn from(outcome: ModerationOutcome) -> Self {
        match outcome {
            ModerationOutcome::Approved => Self::Approved,
            ModerationOutcome::Rejected => Self::Rejected,
            ModerationOutcome::Violation => Self::Violation,
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "violation" => Ok(Self::Violation),
            "withdrawn" => Ok(Self::Withdrawn),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(format!("Invalid item outcome: {s}")),
        }
    }
}
