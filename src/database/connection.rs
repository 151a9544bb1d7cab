use crate::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::migrations::DatabaseMigrations;

/// Owns the pool shared by every component of one process.
///
/// Several processes may open the same database file; WAL journaling and the busy
/// timeout let them interleave writes without surfacing `SQLITE_BUSY` to callers.
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout())
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Connected to queue store"
        );

        Ok(Self { pool })
    }

    /// Connect and bring the schema up to date
    pub async fn connect_and_migrate(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let connection = Self::connect(config).await?;
        let applied = connection.migrate().await?;
        debug!(applied, "Schema ready");
        Ok(connection)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<usize, sqlx::Error> {
        DatabaseMigrations::run_all(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
