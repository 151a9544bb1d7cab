#![allow(clippy::doc_markdown)] // Allow technical terms like SQLite, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Moderation Queue Core
//!
//! Multi-queue priority scheduler for content moderation.
//!
//! ## Overview
//!
//! Topics, posts and private messages enter one of four queues when they are submitted.
//! Background workers claim items under a lease, evaluate the content and record a
//! decision, which moves the content through its status machine and, for multi-stage
//! content, hands it to the next queue (a post that passes ToS screening enters the
//! moderation queue of its topic).
//!
//! Several worker processes share one SQLite store. The store is the synchronization
//! boundary: every status change is a guarded conditional update, so a claim can never
//! hand the same item to two workers and a decision is never half-applied.
//!
//! ## Queues
//!
//! | queue             | content | partition                     | on approval          |
//! |-------------------|---------|-------------------------------|----------------------|
//! | `topic_creation`  | topic   | `global`                      |                      |
//! | `tos_screening`   | post    | `global`                      | `post_moderation`    |
//! | `post_moderation` | post    | `topic:<topic id>`            |                      |
//! | `private_message` | message | `conversation:users_<a>_<b>`  |                      |
//!
//! Inside a partition items are served by priority (0-100, higher first), then FIFO.
//!
//! ## Module Organization
//!
//! - [`queue`] - Store, positions, claiming, finalizing, coordinator and maintenance
//! - [`state_machine`] - Content status machines and the audit trail
//! - [`models`] - Queue items and content entities
//! - [`database`] - Pool construction and embedded migrations
//! - [`worker`] - Claim/screen/finalize loop around a pluggable screener
//! - [`config`] - YAML configuration with per-environment overrides
//! - [`events`] - Lifecycle event broadcasting
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use moderation_queue::constants::{ModerationOutcome, QueueType};
//! use moderation_queue::models::NewTopic;
//! use moderation_queue::ModerationQueueCore;
//! use uuid::Uuid;
//!
//! # async fn example() -> moderation_queue::Result<()> {
//! let core = ModerationQueueCore::new().await?;
//!
//! let (_topic, item) = core
//!     .submit_topic(
//!         NewTopic {
//!             author_id: Uuid::new_v4(),
//!             title: "Welcome".to_string(),
//!             body: "Say hello".to_string(),
//!         },
//!         None,
//!     )
//!     .await?;
//!
//! if let Some(claimed) = core
//!     .claimer
//!     .claim_next(QueueType::TopicCreation, Some(&item.partition_key), Some("worker-1"))
//!     .await?
//! {
//!     core.finalizer
//!         .finalize(claimed.id, ModerationOutcome::Approved, None)
//!         .await?;
//! }
//!
//! let overview = core.coordinator.overview().await?;
//! println!("{} items pending", overview.total_pending());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod core;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod queue;
pub mod state_machine;
pub mod worker;

pub use crate::core::ModerationQueueCore;
pub use config::{ConfigManager, ModerationQueueConfig};
pub use constants::{ContentType, ItemOutcome, ModerationOutcome, QueueStatus, QueueType};
pub use error::{QueueError, Result};
pub use models::{Content, ContentRef, NewQueueItem, QueueItem};
pub use queue::{Claimer, Coordinator, Finalizer, PositionCalculator, QueueStore};
pub use worker::{ContentScreener, Evaluation, QueueWorker};
