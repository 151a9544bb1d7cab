use moderation_queue::config::{DatabaseConfig, ModerationQueueConfig};
use moderation_queue::database::DatabaseConnection;
use moderation_queue::ModerationQueueCore;
use tempfile::TempDir;

/// A core over a throwaway SQLite file. Keep the struct alive for the whole test:
/// dropping it removes the database directory.
pub struct TestQueue {
    pub core: ModerationQueueCore,
    _dir: TempDir,
}

impl std::ops::Deref for TestQueue {
    type Target = ModerationQueueCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// Configuration tuned for tests: two attempts, short retry backoff
pub fn test_config() -> ModerationQueueConfig {
    let mut config = ModerationQueueConfig::default();
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 200;
    config.retry.max_delay_ms = 200;
    config.lease.timeout_seconds = 60;
    config.worker.poll_interval_ms = 10;
    config
}

pub async fn setup_test_queue() -> TestQueue {
    setup_test_queue_with(test_config()).await
}

pub async fn setup_test_queue_with(mut config: ModerationQueueConfig) -> TestQueue {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("moderation.db");
    config.database = DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        ..DatabaseConfig::default()
    };

    let database = DatabaseConnection::connect_and_migrate(&config.database)
        .await
        .expect("connect and migrate test database");
    let core = ModerationQueueCore::from_pool_and_config(database.pool().clone(), config);

    TestQueue { core, _dir: dir }
}
