//! Error types for dispatch engine operations.
//!
//! Splits the taxonomy the way the pipeline treats it: [`EngineError`] for
//! failures surfaced synchronously to callers (validation, configuration,
//! lookups, lifecycle), [`ExecutionError`] for failures an executor
//! reports at run time, which are absorbed by the dispatcher and routed to
//! retry rather than propagated.

use std::time::Duration;

use relay_core::{CoreError, TaskId, TaskKind};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced synchronously by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Submission rejected before entering any queue.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the submission.
        message: String,
    },

    /// No executor registered for a task kind.
    #[error("no executor registered for task kind '{kind}'")]
    ExecutorMissing {
        /// The unhandled kind.
        kind: TaskKind,
    },

    /// Referenced task does not exist in any partition.
    #[error("task {id} not found")]
    TaskNotFound {
        /// The missing task ID.
        id: TaskId,
    },

    /// Referenced task is already terminal and cannot transition.
    #[error("task {id} is already terminal")]
    TaskTerminal {
        /// The terminal task ID.
        id: TaskId,
    },

    /// Schedule definition was invalid or unparseable.
    #[error(transparent)]
    Schedule(#[from] CoreError),

    /// Engine loops did not stop within the shutdown timeout.
    #[error("engine shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The exceeded timeout.
        timeout: Duration,
    },
}

impl EngineError {
    /// Creates a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

/// Failure reported by an executor at run time.
///
/// Carries a descriptive message for the failed task's `last_error`, the
/// activity log, and operator diagnostics. These failures never propagate
/// to the original submitter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutionError {
    /// Human-readable cause of the failure.
    pub message: String,
}

impl ExecutionError {
    /// Creates an execution error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
