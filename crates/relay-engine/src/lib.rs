//! Task dispatch engine with priority queues and retry guarantees.
//!
//! This crate implements the core dispatch system: per-kind priority
//! queues drained by a periodic dispatcher, a delay-heap retry coordinator
//! with exponential backoff, a recurring-task scheduler, and a bounded
//! activity log for observability.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   materialize   ┌────────────────┐   invoke    ┌──────────┐
//! │ Scheduler │────────────────▶│   Dispatcher   │────────────▶│ Executor │
//! └───────────┘                 │ (round-robin)  │             └──────────┘
//!                               └────────────────┘                   │
//!        submit ──────────────────────▲   │ failure                  │
//!                                     │   ▼                          ▼
//!                          ┌──────────────────────┐        completed / failed
//!                          │  RetryCoordinator    │            bounded logs
//!                          │  (delay heap)        │
//!                          └──────────────────────┘
//! ```
//!
//! # Key properties
//!
//! - **Priority ordering** - high before normal before low, FIFO within a
//!   tier, round-robin fairness across kinds.
//! - **Exactly one partition** - every task lives in exactly one of the
//!   pending queues, the in-flight set, or the bounded terminal logs.
//! - **At-least-once execution** - executors are idempotent by contract;
//!   retries are new tasks with elevated priority and capped backoff.
//! - **Cooperative cancellation** - in-flight executor results of
//!   cancelled tasks are discarded, never interrupted.

pub mod activity;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use activity::{ActivityEntry, ActivityLog};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use engine::{DispatchEngine, EngineConfig, ReprocessReport};
pub use error::{EngineError, ExecutionError, Result};
pub use executor::{Executor, ExecutorRegistry};
pub use queue::PriorityQueue;
pub use retry::{RetryCoordinator, RetryDecision, RetryPolicy, RetrySnapshot};
pub use scheduler::{NewDefinition, Scheduler};
pub use store::{CancelOutcome, Page, TaskFilter, TaskPartition, TaskStore, TenantStats};

/// Default dispatch cycle interval.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 5_000;

/// Default per-task executor timeout in seconds.
pub const DEFAULT_EXECUTE_TIMEOUT_SECS: u64 = 30;

/// Default completed-log capacity per tenant.
pub const DEFAULT_COMPLETED_LOG_CAP: usize = 1_000;

/// Default failed-log capacity per tenant.
pub const DEFAULT_FAILED_LOG_CAP: usize = 500;
