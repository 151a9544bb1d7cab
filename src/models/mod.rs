//! Data layer: queue items, content entities and the content status audit trail.

pub mod content;
pub mod queue_item;

pub use content::{
    Content, ContentRef, ContentStatusTransition, NewPost, NewPrivateMessage, NewTopic,
};
pub use queue_item::{NewQueueItem, QueueItem};
