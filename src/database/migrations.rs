//! # Database Migration System
//!
//! Versioned schema migrations embedded in the binary.
//!
//! Migration files live in `migrations/` and follow the naming convention
//! `YYYYMMDDHHMMSS_description.sql`. They are compiled in with `include_str!` so that
//! workers and the maintenance binary never depend on the working directory.
//!
//! Applied versions are recorded in `schema_migrations`; running the migrator again only
//! applies what is missing. Each migration runs inside its own transaction together with
//! its version row, so a crash mid-migration leaves nothing half-applied.

use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

const EMBEDDED_MIGRATIONS: &[(&str, &str)] = &[
    (
        "20260301000001_create_content_tables",
        include_str!("../../migrations/20260301000001_create_content_tables.sql"),
    ),
    (
        "20260301000002_create_queue_items",
        include_str!("../../migrations/20260301000002_create_queue_items.sql"),
    ),
    (
        "20260301000003_create_content_status_transitions",
        include_str!("../../migrations/20260301000003_create_content_status_transitions.sql"),
    ),
];

/// Represents a single embedded migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    pub sql: &'static str,
}

/// Applies the embedded schema migrations.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all outstanding migrations in version order. Returns how many were applied.
    pub async fn run_all(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
        Self::ensure_migration_table(pool).await?;

        let migrations = Self::discover_migrations();
        let applied = Self::get_applied_migrations(pool).await?;
        let mut count = 0;

        for migration in migrations.values() {
            if applied.contains(&migration.version) {
                continue;
            }
            info!(
                version = %migration.version,
                name = %migration.name,
                "Applying migration"
            );
            Self::run_migration(pool, migration).await?;
            count += 1;
        }

        debug!(applied = count, "Migrations up to date");
        Ok(count)
    }

    /// Versions of every embedded migration, in application order
    pub fn known_versions() -> Vec<String> {
        Self::discover_migrations().into_keys().collect()
    }

    fn discover_migrations() -> BTreeMap<String, Migration> {
        EMBEDDED_MIGRATIONS
            .iter()
            .filter_map(|(filename, sql)| {
                Self::parse_migration_filename(filename).map(|(version, name)| {
                    (
                        version.clone(),
                        Migration {
                            version,
                            name,
                            sql,
                        },
                    )
                })
            })
            .collect()
    }

    /// Parse migration filename to extract version and name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        // Expected format: YYYYMMDDHHMMSS_migration_name
        if filename.len() < 15 {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);

        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part
            .strip_prefix('_')
            .unwrap_or(name_part)
            .replace('_', " ");

        Some((version_part.to_string(), name))
    }

    async fn ensure_migration_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
        "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn get_applied_migrations(pool: &SqlitePool) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM schema_migrations")
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    async fn run_migration(pool: &SqlitePool, migration: &Migration) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;

        // OR IGNORE: a concurrent migrator may have recorded the same version first
        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version) VALUES (?)")
            .bind(&migration.version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migration_filename() {
        assert_eq!(
            DatabaseMigrations::parse_migration_filename("20260301000002_create_queue_items"),
            Some(("20260301000002".to_string(), "create queue items".to_string()))
        );
        assert_eq!(DatabaseMigrations::parse_migration_filename("short"), None);
        assert_eq!(
            DatabaseMigrations::parse_migration_filename("2026030100000x_bad_version"),
            None
        );
    }

    #[test]
    fn test_embedded_migrations_are_ordered() {
        let versions = DatabaseMigrations::known_versions();
        assert_eq!(versions.len(), EMBEDDED_MIGRATIONS.len());
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }
}
