use crate::constants::ContentType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic lifecycle: PENDING_APPROVAL -> {APPROVED, REJECTED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    #[default]
    PendingApproval,
    Approved,
    Rejected,
}

impl TopicStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingApproval)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for TopicStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid topic status: {s}")),
        }
    }
}

/// Post lifecycle. Screening moves SUBMITTED to IN_TRANSIT (or short-circuits to
/// TOS_VIOLATION); moderation then decides APPROVED or REJECTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Submitted,
    InTransit,
    Approved,
    Rejected,
    TosViolation,
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::TosViolation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::InTransit => "in_transit",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TosViolation => "tos_violation",
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "in_transit" => Ok(Self::InTransit),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "tos_violation" => Ok(Self::TosViolation),
            _ => Err(format!("Invalid post status: {s}")),
        }
    }
}

/// Private message lifecycle: SUBMITTED -> {APPROVED, REJECTED}.
/// Read/unread tracking lives on the message row and is independent of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivateMessageStatus {
    #[default]
    Submitted,
    Approved,
    Rejected,
}

impl PrivateMessageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for PrivateMessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid private message status: {s}")),
        }
    }
}

/// Status of any content entity, tagged with its content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "content_type", content = "status", rename_all = "snake_case")]
pub enum ContentStatus {
    Topic(TopicStatus),
    Post(PostStatus),
    PrivateMessage(PrivateMessageStatus),
}

impl ContentStatus {
    /// Status a freshly submitted entity of this type starts in
    pub fn initial(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Topic => Self::Topic(TopicStatus::default()),
            ContentType::Post => Self::Post(PostStatus::default()),
            ContentType::PrivateMessage => Self::PrivateMessage(PrivateMessageStatus::default()),
        }
    }

    /// Parse a persisted status string for the given content type
    pub fn parse(content_type: ContentType, s: &str) -> Result<Self, String> {
        Ok(match content_type {
            ContentType::Topic => Self::Topic(s.parse()?),
            ContentType::Post => Self::Post(s.parse()?),
            ContentType::PrivateMessage => Self::PrivateMessage(s.parse()?),
        })
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Topic(_) => ContentType::Topic,
            Self::Post(_) => ContentType::Post,
            Self::PrivateMessage(_) => ContentType::PrivateMessage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic(status) => status.as_str(),
            Self::Post(status) => status.as_str(),
            Self::PrivateMessage(status) => status.as_str(),
        }
    }

    /// Check if this is a terminal state (no further transitions by the scheduler)
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Topic(status) => status.is_terminal(),
            Self::Post(status) => status.is_terminal(),
            Self::PrivateMessage(status) => status.is_terminal(),
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_checks() {
        assert!(!PostStatus::Submitted.is_terminal());
        assert!(!PostStatus::InTransit.is_terminal());
        assert!(PostStatus::TosViolation.is_terminal());
        assert!(TopicStatus::Rejected.is_terminal());
        assert!(!PrivateMessageStatus::Submitted.is_terminal());
    }

    #[test]
    fn test_parse_is_scoped_to_content_type() {
        assert_eq!(
            ContentStatus::parse(ContentType::Post, "in_transit").unwrap(),
            ContentStatus::Post(PostStatus::InTransit)
        );
        assert!(ContentStatus::parse(ContentType::Topic, "in_transit").is_err());
        assert!(ContentStatus::parse(ContentType::PrivateMessage, "tos_violation").is_err());
    }

    #[test]
    fn test_initial_statuses() {
        assert_eq!(
            ContentStatus::initial(ContentType::Topic).as_str(),
            "pending_approval"
        );
        assert_eq!(ContentStatus::initial(ContentType::Post).as_str(), "submitted");
        assert_eq!(
            ContentStatus::initial(ContentType::PrivateMessage).content_type(),
            ContentType::PrivateMessage
        );
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_value(ContentStatus::Post(PostStatus::TosViolation)).unwrap();
        assert_eq!(json["content_type"], "post");
        assert_eq!(json["status"], "tos_violation");
    }
}
