//! Core domain models for the Relay dispatch engine.
//!
//! Provides strongly-typed identifiers, the task state machine, recurring
//! schedule definitions, and the clock abstraction used across the
//! workspace. All other crates depend on these foundational types for
//! type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod schedule;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DefinitionId, Payload, RecurringDefinition, Task, TaskId, TaskKind, TaskPriority, TaskStatus,
    TenantId,
};
pub use schedule::{CronExpr, Schedule};
pub use time::{Clock, SystemClock, TestClock};
