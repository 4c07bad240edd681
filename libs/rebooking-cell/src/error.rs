use thiserror::Error;

use waitlist_cell::WaitlistError;

#[derive(Error, Debug)]
pub enum RebookingError {
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Operation {operation} not allowed while {status}")]
    IllegalState { operation: String, status: String },

    #[error("Invitation fan-out would exceed the cap of {max}")]
    CapacityExceeded { max: i32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invitation already responded: {0}")]
    AlreadyResponded(String),

    #[error("Notifier delivery failed: {0}")]
    NotifierFailure(String),

    #[error("Scheduling service error: {0}")]
    SchedulingError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Waitlist error: {0}")]
    Waitlist(#[from] WaitlistError),
}

impl RebookingError {
    pub fn illegal_state(operation: &str, status: impl std::fmt::Display) -> Self {
        RebookingError::IllegalState {
            operation: operation.to_string(),
            status: status.to_string(),
        }
    }

    /// Transient failures the caller may retry (by re-running dispatch).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RebookingError::NotifierFailure(_))
    }
}
