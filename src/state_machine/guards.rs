use super::errors::{guard_failed, StateMachineResult};
use super::states::ContentStatus;
use crate::constants::{ContentType, QueueType};
use crate::queue::kinds::QueueKind;

/// The queue's content type must match the entity it is deciding
pub fn check_queue_serves(queue_type: QueueType, content_type: ContentType) -> StateMachineResult<()> {
    let expected = QueueKind::of(queue_type).content_type;
    if expected != content_type {
        return Err(guard_failed(format!(
            "{queue_type} queue decides {expected} content, not {content_type}"
        )));
    }
    Ok(())
}

/// External overrides may only move a decided entity to a different status of its own type
pub fn check_override(current: ContentStatus, target: ContentStatus) -> StateMachineResult<()> {
    if current.content_type() != target.content_type() {
        return Err(guard_failed(format!(
            "cannot move {} content to a {} status",
            current.content_type(),
            target.content_type()
        )));
    }
    if !current.is_terminal() {
        return Err(guard_failed(format!(
            "{} content in '{current}' has not been decided yet",
            current.content_type()
        )));
    }
    if current == target {
        return Err(guard_failed(format!(
            "{} content is already '{target}'",
            current.content_type()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::states::{PostStatus, TopicStatus};

    #[test]
    fn test_queue_content_pairing() {
        assert!(check_queue_serves(QueueType::TosScreening, ContentType::Post).is_ok());
        assert!(check_queue_serves(QueueType::TopicCreation, ContentType::Post).is_err());
    }

    #[test]
    fn test_override_requires_decided_source() {
        let rejected = ContentStatus::Post(PostStatus::Rejected);
        let approved = ContentStatus::Post(PostStatus::Approved);
        assert!(check_override(rejected, approved).is_ok());
        assert!(check_override(ContentStatus::Post(PostStatus::InTransit), approved).is_err());
        assert!(check_override(approved, approved).is_err());
        assert!(check_override(rejected, ContentStatus::Topic(TopicStatus::Approved)).is_err());
    }
}
