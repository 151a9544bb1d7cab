//! Lifecycle events for queue items and content.
//!
//! Events are published only after the transaction that caused them has committed, so a
//! subscriber never sees an event for a change that was rolled back. Event names live in
//! [`crate::constants::events`].
//!
//! ```rust
//! use moderation_queue::constants::events;
//! use moderation_queue::events::EventPublisher;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut receiver = publisher.subscribe();
//!
//! publisher
//!     .publish(events::RECONCILED, json!({ "closed": 1 }))
//!     .await
//!     .unwrap();
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.name, events::RECONCILED);
//! # });
//! ```

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
