//! # Content Models
//!
//! Topics, posts and private messages as seen by the scheduler, plus the audit trail of
//! their status changes.
//!
//! Submission handlers own content creation; the constructors here are the minimal write
//! path those handlers (and tests) use so that a row exists in its initial status before
//! it is enqueued. Everything else about content (editing, read tracking, deletion) is
//! outside the scheduler.

use crate::constants::ContentType;
use crate::error::{QueueError, Result};
use crate::state_machine::ContentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

/// Typed reference to a content entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_type: ContentType,
    pub content_pk: Uuid,
}

impl ContentRef {
    pub fn new(content_type: ContentType, content_pk: Uuid) -> Self {
        Self {
            content_type,
            content_pk,
        }
    }

    pub fn topic(content_pk: Uuid) -> Self {
        Self::new(ContentType::Topic, content_pk)
    }

    pub fn post(content_pk: Uuid) -> Self {
        Self::new(ContentType::Post, content_pk)
    }

    pub fn private_message(content_pk: Uuid) -> Self {
        Self::new(ContentType::PrivateMessage, content_pk)
    }
}

/// A content entity in one shape for all three content types.
///
/// `title` is the topic title for topics and the parent topic's title for posts;
/// private messages have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub content_type: ContentType,
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: Option<String>,
    pub body: String,
    pub status: ContentStatus,
    /// Topic of a post
    pub parent_pk: Option<Uuid>,
    /// Recipient of a private message
    pub recipient_id: Option<Uuid>,
    pub moderation_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ContentRow {
    id: Uuid,
    author_id: Uuid,
    title: Option<String>,
    body: String,
    status: String,
    parent_pk: Option<Uuid>,
    recipient_id: Option<Uuid>,
    moderation_feedback: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContentRow {
    fn into_content(self, content_type: ContentType) -> Result<Content> {
        let status =
            ContentStatus::parse(content_type, &self.status).map_err(QueueError::Validation)?;
        Ok(Content {
            content_type,
            id: self.id,
            author_id: self.author_id,
            title: self.title,
            body: self.body,
            status,
            parent_pk: self.parent_pk,
            recipient_id: self.recipient_id,
            moderation_feedback: self.moderation_feedback,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// New topic submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTopic {
    pub author_id: Uuid,
    pub title: String,
    pub body: String,
}

/// New post submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub topic_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
}

/// New private message submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrivateMessage {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
}

impl Content {
    pub fn content_ref(&self) -> ContentRef {
        ContentRef::new(self.content_type, self.id)
    }

    fn select_sql(content_type: ContentType) -> &'static str {
        match content_type {
            ContentType::Topic => {
                r#"
                SELECT id, author_id, title, body, status,
                       NULL AS parent_pk, NULL AS recipient_id,
                       moderation_feedback, created_at, updated_at
                FROM topics WHERE id = ?
                "#
            }
            ContentType::Post => {
                r#"
                SELECT p.id, p.author_id, t.title AS title, p.body, p.status,
                       p.topic_id AS parent_pk, NULL AS recipient_id,
                       p.moderation_feedback, p.created_at, p.updated_at
                FROM posts p
                LEFT JOIN topics t ON t.id = p.topic_id
                WHERE p.id = ?
                "#
            }
            ContentType::PrivateMessage => {
                r#"
                SELECT id, sender_id AS author_id, NULL AS title, body, status,
                       NULL AS parent_pk, recipient_id,
                       moderation_feedback, created_at, updated_at
                FROM private_messages WHERE id = ?
                "#
            }
        }
    }

    /// Find a content entity by reference
    pub async fn find<'e, E>(executor: E, content: ContentRef) -> Result<Option<Content>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, ContentRow>(Self::select_sql(content.content_type))
            .bind(content.content_pk)
            .fetch_optional(executor)
            .await?;

        row.map(|row| row.into_content(content.content_type))
            .transpose()
    }

    /// Find a content entity, treating absence as an error
    pub async fn get<'e, E>(executor: E, content: ContentRef) -> Result<Content>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        Self::find(executor, content)
            .await?
            .ok_or(QueueError::ContentNotFound {
                content_type: content.content_type.to_string(),
                content_pk: content.content_pk,
            })
    }

    pub async fn create_topic(pool: &SqlitePool, new_topic: NewTopic) -> Result<Content> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO topics (id, author_id, title, body, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(new_topic.author_id)
        .bind(&new_topic.title)
        .bind(&new_topic.body)
        .bind(ContentStatus::initial(ContentType::Topic).as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, ContentRef::topic(id)).await
    }

    pub async fn create_post(pool: &SqlitePool, new_post: NewPost) -> Result<Content> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO posts (id, topic_id, author_id, body, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(new_post.topic_id)
        .bind(new_post.author_id)
        .bind(&new_post.body)
        .bind(ContentStatus::initial(ContentType::Post).as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, ContentRef::post(id)).await
    }

    pub async fn create_private_message(
        pool: &SqlitePool,
        new_message: NewPrivateMessage,
    ) -> Result<Content> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO private_messages
                (id, sender_id, recipient_id, body, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(new_message.sender_id)
        .bind(new_message.recipient_id)
        .bind(&new_message.body)
        .bind(ContentStatus::initial(ContentType::PrivateMessage).as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get(pool, ContentRef::private_message(id)).await
    }
}

/// One row of the content status audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ContentStatusTransition {
    pub id: i64,
    pub content_type: ContentType,
    pub content_pk: Uuid,
    pub from_status: String,
    pub to_status: String,
    /// Queue item whose finalization caused the change; `None` for external overrides
    pub queue_item_id: Option<i64>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl ContentStatusTransition {
    /// Full history of one entity, oldest first
    pub async fn history(
        pool: &SqlitePool,
        content: ContentRef,
    ) -> Result<Vec<ContentStatusTransition>> {
        let transitions = sqlx::query_as::<_, ContentStatusTransition>(
            r#"
            SELECT id, content_type, content_pk, from_status, to_status,
                   queue_item_id, reason, created_at
            FROM content_status_transitions
            WHERE content_type = ? AND content_pk = ?
            ORDER BY id ASC
            "#,
        )
        .bind(content.content_type)
        .bind(content.content_pk)
        .fetch_all(pool)
        .await?;

        Ok(transitions)
    }
}
