//! # Moderation Queue Core
//!
//! One place that turns configuration into a connected, migrated store and the components
//! built on it. Every entry point (the maintenance binary, workers, submission handlers,
//! integration tests) bootstraps through here so they share the same wiring.
//!
//! Components are explicit handles over the shared pool; there is no process-wide state.

use crate::config::{ConfigManager, ModerationQueueConfig};
use crate::constants::{ContentType, QueueType};
use crate::database::DatabaseConnection;
use crate::error::{QueueError, Result};
use crate::events::EventPublisher;
use crate::models::{
    Content, ContentRef, ContentStatusTransition, NewPost, NewPrivateMessage, NewQueueItem,
    NewTopic, QueueItem,
};
use crate::queue::{
    Claimer, Coordinator, Finalizer, MaintenanceRunner, PositionCalculator, QueueKind, QueueStore,
};
use crate::state_machine::{ContentStatus, ContentStatusMachine};
use crate::worker::{ContentScreener, QueueWorker};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct ModerationQueueCore {
    pub database: DatabaseConnection,
    pub events: EventPublisher,
    pub store: QueueStore,
    pub positions: PositionCalculator,
    pub claimer: Claimer,
    pub finalizer: Finalizer,
    pub coordinator: Coordinator,
    config: ModerationQueueConfig,
}

impl ModerationQueueCore {
    /// Load configuration for the detected environment and bootstrap from it
    pub async fn new() -> Result<Self> {
        let config_manager = ConfigManager::load_or_default()?;
        Self::from_config(config_manager).await
    }

    /// Connect, migrate and build every component
    pub async fn from_config(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.config().clone();
        config.validate()?;

        info!(
            environment = config_manager.environment(),
            database_url = %config.database.url,
            "Initializing moderation queue core"
        );

        let database = DatabaseConnection::connect_and_migrate(&config.database).await?;
        Ok(Self::from_connection(database, config))
    }

    /// Build on an existing pool whose schema is already migrated
    pub fn from_pool_and_config(pool: SqlitePool, config: ModerationQueueConfig) -> Self {
        Self::from_connection(DatabaseConnection::from_pool(pool), config)
    }

    fn from_connection(database: DatabaseConnection, config: ModerationQueueConfig) -> Self {
        let events = EventPublisher::new(config.events.channel_capacity);
        let store = QueueStore::new(database.pool().clone(), events.clone());
        let positions = PositionCalculator::new(database.pool().clone(), config.estimation.clone());
        let claimer = Claimer::new(store.clone(), config.claim.clone());
        let finalizer = Finalizer::new(store.clone(), config.retry.clone());
        let coordinator = Coordinator::new(store.clone(), positions.clone());

        Self {
            database,
            events,
            store,
            positions,
            claimer,
            finalizer,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &ModerationQueueConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        self.database.pool()
    }

    pub fn maintenance_runner(&self) -> MaintenanceRunner {
        MaintenanceRunner::new(
            self.store.clone(),
            self.config.lease.clone(),
            self.config.maintenance.clone(),
        )
    }

    /// A worker for `queue_type`; `partition_key = None` serves every partition
    pub fn worker(
        &self,
        queue_type: QueueType,
        partition_key: Option<String>,
        screener: Arc<dyn ContentScreener>,
    ) -> QueueWorker {
        QueueWorker::new(
            queue_type,
            partition_key,
            self.store.clone(),
            self.claimer.clone(),
            self.finalizer.clone(),
            screener,
            self.config.worker.clone(),
            self.config.lease.timeout(),
        )
    }

    /// Put existing content into a queue under an explicit partition key.
    /// Returns the new item id.
    pub async fn enqueue(
        &self,
        queue_type: QueueType,
        content: ContentRef,
        partition_key: &str,
        priority_score: Option<i64>,
    ) -> Result<i64> {
        let stored = Content::get(self.pool(), content).await?;
        let mut new_item = NewQueueItem::for_content(queue_type, &stored, priority_score)?;
        new_item.partition_key = partition_key.to_string();
        Ok(self.store.enqueue(new_item).await?.id)
    }

    pub async fn submit_topic(
        &self,
        new_topic: NewTopic,
        priority_score: Option<i64>,
    ) -> Result<(Content, QueueItem)> {
        let content = Content::create_topic(self.pool(), new_topic).await?;
        self.enqueue_submission(content, priority_score).await
    }

    pub async fn submit_post(
        &self,
        new_post: NewPost,
        priority_score: Option<i64>,
    ) -> Result<(Content, QueueItem)> {
        let content = Content::create_post(self.pool(), new_post).await?;
        self.enqueue_submission(content, priority_score).await
    }

    pub async fn submit_private_message(
        &self,
        new_message: NewPrivateMessage,
        priority_score: Option<i64>,
    ) -> Result<(Content, QueueItem)> {
        let content = Content::create_private_message(self.pool(), new_message).await?;
        self.enqueue_submission(content, priority_score).await
    }

    async fn enqueue_submission(
        &self,
        content: Content,
        priority_score: Option<i64>,
    ) -> Result<(Content, QueueItem)> {
        let queue_type = QueueKind::entry_queue(content.content_type);
        let new_item = NewQueueItem::for_content(queue_type, &content, priority_score)?;
        let item = self.store.enqueue(new_item).await?;
        Ok((content, item))
    }

    /// Move a decided entity to another status on behalf of appeals or flag disputes
    pub async fn apply_external_override(
        &self,
        content: ContentRef,
        target: ContentStatus,
        reason: &str,
    ) -> Result<ContentStatusTransition> {
        if reason.trim().is_empty() {
            return Err(QueueError::Validation(
                "an override needs a reason".to_string(),
            ));
        }
        let transition =
            ContentStatusMachine::apply_external_override(self.pool(), content, target, reason)
                .await?;
        let _ = self.events.publish_status_change(&transition).await;
        Ok(transition)
    }

    /// Queue items ever created for one content entity, oldest first
    pub async fn queue_history(&self, content_type: ContentType, content_pk: Uuid) -> Result<Vec<QueueItem>> {
        let items = self.store.items_for_content(content_pk).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.content_type == content_type)
            .collect())
    }

    /// Close the pool
    pub async fn shutdown(self) {
        self.database.close().await;
    }
}
