use moderation_queue::models::{Content, NewPost, NewPrivateMessage, NewTopic, QueueItem};
use moderation_queue::ModerationQueueCore;
use uuid::Uuid;

pub async fn submit_topic(
    core: &ModerationQueueCore,
    title: &str,
    priority: Option<i64>,
) -> (Content, QueueItem) {
    core.submit_topic(
        NewTopic {
            author_id: Uuid::new_v4(),
            title: title.to_string(),
            body: format!("Body of {title}"),
        },
        priority,
    )
    .await
    .expect("submit topic")
}

pub async fn submit_post(
    core: &ModerationQueueCore,
    topic_id: Uuid,
    body: &str,
    priority: Option<i64>,
) -> (Content, QueueItem) {
    core.submit_post(
        NewPost {
            topic_id,
            author_id: Uuid::new_v4(),
            body: body.to_string(),
        },
        priority,
    )
    .await
    .expect("submit post")
}

pub async fn submit_message(
    core: &ModerationQueueCore,
    sender_id: Uuid,
    recipient_id: Uuid,
    body: &str,
) -> (Content, QueueItem) {
    core.submit_private_message(
        NewPrivateMessage {
            sender_id,
            recipient_id,
            body: body.to_string(),
        },
        None,
    )
    .await
    .expect("submit private message")
}
