// Content lifecycle state machines
//
// Each content type owns its own status enum. Queue decisions and external overrides are
// the only events, and every applied transition leaves an audit row.

pub mod content_state_machine;
pub mod errors;
pub mod events;
pub mod guards;
pub mod persistence;
pub mod states;

// Re-export main types for convenient access
pub use content_state_machine::{AppliedDecision, ContentStatusMachine, Transition};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::ContentEvent;
pub use persistence::ContentTransitionPersistence;
pub use states::{ContentStatus, PostStatus, PrivateMessageStatus, TopicStatus};
