use super::states::ContentStatus;
use crate::constants::{ModerationOutcome, QueueType};
use serde::{Deserialize, Serialize};

/// Events that can trigger content status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentEvent {
    /// A queue of the given type finalized the content with a decision
    Decided {
        queue_type: QueueType,
        outcome: ModerationOutcome,
    },
    /// An external collaborator (appeal, flag dispute) re-opens a decided entity
    ExternalOverride { target: ContentStatus, reason: String },
}

impl ContentEvent {
    pub fn decided(queue_type: QueueType, outcome: ModerationOutcome) -> Self {
        Self::Decided {
            queue_type,
            outcome,
        }
    }

    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Decided { .. } => "decided",
            Self::ExternalOverride { .. } => "external_override",
        }
    }

    /// Reason recorded on the audit row
    pub fn reason(&self) -> String {
        match self {
            Self::Decided {
                queue_type,
                outcome,
            } => format!("{queue_type}:{outcome}"),
            Self::ExternalOverride { reason, .. } => format!("override:{reason}"),
        }
    }
}
