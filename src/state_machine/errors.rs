use thiserror::Error;

/// Error types for content state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: Option<String>, to: String },

    #[error("Persistence operation failed: {reason}")]
    PersistenceFailed { reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// Helper function to create a guard failure
pub fn guard_failed(reason: impl Into<String>) -> StateMachineError {
    StateMachineError::GuardFailed {
        reason: reason.into(),
    }
}

/// Helper function to create an invalid transition error
pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> StateMachineError {
    StateMachineError::InvalidTransition {
        from: Some(from.into()),
        to: to.into(),
    }
}
