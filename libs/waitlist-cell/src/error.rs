use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaitlistError {
    #[error("Waitlist entry not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
