//! # Database Operations
//!
//! Connection management and schema migrations for the shared queue store.
//!
//! ## Key Components
//!
//! - [`connection`] - Pool construction (WAL journaling, busy timeout, foreign keys)
//! - [`migrations`] - Embedded, versioned schema migrations
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use moderation_queue::config::DatabaseConfig;
//! use moderation_queue::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect_and_migrate(&DatabaseConfig::default()).await?;
//! assert!(db.health_check().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;
