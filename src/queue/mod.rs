//! # Moderation Queues
//!
//! The four queue kinds (topic creation, ToS screening, post moderation, private messages)
//! share one item shape and one store. [`kinds`] describes what differs per kind; every
//! other component is generic over the queue type.
//!
//! ## Components
//!
//! - [`QueueStore`]: durable items and the guarded status transitions
//! - [`PositionCalculator`]: live ranks, per-partition and per-queue statistics
//! - [`Claimer`]: atomic lease hand-out to workers
//! - [`Finalizer`]: decision commit (item, content status, follow-up item) and retry policy
//! - [`Coordinator`]: read-only overview, positions and dashboards
//! - [`maintenance`]: lease sweep, reconciliation and position cache refresh

pub mod claimer;
pub mod coordinator;
pub mod finalizer;
pub mod kinds;
pub mod maintenance;
pub mod position;
pub mod store;

pub use claimer::Claimer;
pub use coordinator::{ContentPosition, Coordinator, DashboardEntry, QueueOverview};
pub use finalizer::{FailureDisposition, FinalizeResult, Finalizer};
pub use kinds::{conversation_partition, topic_partition, PartitionScheme, QueueKind};
pub use maintenance::{
    LeaseSweeper, MaintenanceReport, MaintenanceRunner, ReconcileReport, Reconciler,
};
pub use position::{ItemPosition, PartitionSummary, PositionCalculator, QueueStats, ServingKey};
pub use store::{QueueStore, StaleLease};
