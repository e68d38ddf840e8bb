//! Error types and result handling for core domain operations.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for domain-level failures.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Input failed domain validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A schedule expression could not be parsed.
    ///
    /// Raised synchronously at definition time so a malformed expression
    /// never produces a definition with an unreachable next run.
    #[error("schedule parse error: {0}")]
    ScheduleParse(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Creates an invalid-input error from a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a schedule parse error from a message.
    pub fn schedule_parse(message: impl Into<String>) -> Self {
        Self::ScheduleParse(message.into())
    }

    /// Creates a not-found error from a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}
