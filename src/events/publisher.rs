use crate::constants::events;
use crate::models::{ContentStatusTransition, QueueItem};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast publisher for queue and content lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context
    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        trace!(event = %event.name, "Publishing event");

        // No subscribers is fine: events are fire-and-forget
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Publish a queue item lifecycle event carrying the item snapshot
    pub async fn publish_item(
        &self,
        event_name: &'static str,
        item: &QueueItem,
    ) -> Result<(), PublishError> {
        let context = json!({
            "item_id": item.id,
            "queue_type": item.queue_type,
            "content_type": item.content_type,
            "content_pk": item.content_pk,
            "partition_key": item.partition_key,
            "status": item.status,
            "assigned_worker": item.assigned_worker,
            "attempts": item.attempts,
            "outcome": item.outcome,
        });
        self.publish(event_name, context).await
    }

    /// Publish a content status change
    pub async fn publish_status_change(
        &self,
        change: &ContentStatusTransition,
    ) -> Result<(), PublishError> {
        let context = serde_json::to_value(change)?;
        self.publish(events::CONTENT_STATUS_CHANGED, context).await
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(8);
        assert_eq!(publisher.subscriber_count(), 0);
        publisher
            .publish(events::RECONCILED, json!({"repaired": 0}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let publisher = EventPublisher::default();
        let mut receiver = publisher.subscribe();

        publisher
            .publish(events::ITEM_ENQUEUED, json!({"item_id": 1}))
            .await
            .unwrap();
        publisher
            .publish(events::ITEM_CLAIMED, json!({"item_id": 1}))
            .await
            .unwrap();

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.name, events::ITEM_ENQUEUED);
        assert_eq!(second.name, events::ITEM_CLAIMED);
        assert_eq!(second.context["item_id"], 1);
    }
}
