//! Core domain models and strongly-typed identifiers.
//!
//! Defines tasks, recurring definitions, and newtype ID wrappers for
//! compile-time type safety. Includes the task status state machine and
//! the transition helpers used by the dispatch pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::Schedule;

/// Opaque key/value payload handed to executors untouched.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Strongly-typed task identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. A task ID is
/// generated once at creation and never reused; a retry produces a new
/// task with a new ID rather than mutating the failed original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Creates a new random task ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed tenant identifier.
///
/// Provides multi-tenancy isolation. Queues, logs, and stats are all
/// partitioned by tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed recurring definition identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DefinitionId(pub Uuid);

impl DefinitionId {
    /// Creates a new random definition ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DefinitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DefinitionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Closed enumeration of task types.
///
/// Each kind has its own pending queue and retry policy. New kinds are a
/// deliberate code change, not runtime data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Outbound webhook delivery attempt.
    WebhookRetry,
    /// Payment provider state synchronization.
    PaymentSync,
    /// Courier/delivery provider state synchronization.
    DeliverySync,
    /// Re-send of an undelivered outbound message.
    MessageRetry,
    /// Periodic housekeeping of bounded logs.
    Cleanup,
    /// Scheduled report generation.
    Report,
    /// Tenant-facing notification dispatch.
    Notification,
}

impl TaskKind {
    /// All task kinds, in round-robin dispatch order.
    pub const ALL: [TaskKind; 7] = [
        TaskKind::WebhookRetry,
        TaskKind::PaymentSync,
        TaskKind::DeliverySync,
        TaskKind::MessageRetry,
        TaskKind::Cleanup,
        TaskKind::Report,
        TaskKind::Notification,
    ];

    /// Stable string form used in logs and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebhookRetry => "webhook_retry",
            Self::PaymentSync => "payment_sync",
            Self::DeliverySync => "delivery_sync",
            Self::MessageRetry => "message_retry",
            Self::Cleanup => "cleanup",
            Self::Report => "report",
            Self::Notification => "notification",
        }
    }

    /// Payload field that must be present for this kind, if any.
    ///
    /// Checked synchronously at submission; a task missing its required
    /// field is rejected and never enters a queue.
    pub fn required_payload_field(&self) -> Option<&'static str> {
        match self {
            Self::WebhookRetry => Some("url"),
            Self::PaymentSync => Some("payment_id"),
            Self::DeliverySync => Some("delivery_id"),
            Self::MessageRetry => Some("message_id"),
            Self::Cleanup | Self::Report | Self::Notification => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch priority tier.
///
/// Order matters: the derived `Ord` ranks `High` before `Normal` before
/// `Low`, which is exactly the dequeue order of the pending queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Dequeued first; used for retries and latency-sensitive work.
    High,
    /// Default tier for fresh submissions.
    Normal,
    /// Background work that can wait behind everything else.
    Low,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Task lifecycle status.
///
/// Tasks progress through these states during dispatch. Transitions are
/// strictly controlled:
///
/// ```text
/// Pending -> Processing -> Completed
///         |             -> Failed    (retry creates a NEW pending task)
///         '-> Cancelled    (before pickup, or cooperatively in flight)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in a priority queue for the dispatcher.
    Pending,

    /// Claimed by the dispatch cycle; an executor call is in flight.
    Processing,

    /// Terminal success state. The task will never run again.
    Completed,

    /// Terminal failure state.
    ///
    /// Automatic retries produce a successor task; the failed original is
    /// immutable history in the failed log.
    Failed,

    /// Terminal cancelled state.
    ///
    /// Cancellation is cooperative: an in-flight executor call is allowed
    /// to finish, but its result is discarded.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One unit of deferred or retried work.
///
/// Generalizes background jobs and webhook delivery attempts. A task is
/// present in exactly one of {pending queue, in-flight set, completed log,
/// failed log} at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, immutable after creation.
    pub id: TaskId,

    /// Tenant that owns this task.
    pub tenant_id: TenantId,

    /// Task type, selects the executor and the retry policy.
    pub kind: TaskKind,

    /// Opaque payload passed to the executor untouched.
    pub payload: Payload,

    /// Dispatch priority within the kind's queue.
    pub priority: TaskPriority,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Retry generation: 0 at first submission, incremented per retry.
    pub attempt: u32,

    /// Attempt bound fixed at submission time.
    ///
    /// Once `attempt + 1` reaches this value the task is terminal and is
    /// never re-enqueued automatically.
    pub max_attempts: u32,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// Bumped on every status transition.
    pub updated_at: DateTime<Utc>,

    /// When the task completed successfully (terminal state).
    pub completed_at: Option<DateTime<Utc>>,

    /// When the task failed (terminal state).
    pub failed_at: Option<DateTime<Utc>>,

    /// Human-readable cause of the most recent failure.
    ///
    /// Cleared only on success.
    pub last_error: Option<String>,

    /// Opaque executor output captured on success, for observability only.
    pub result: Option<serde_json::Value>,
}

impl Task {
    /// Creates a new pending task.
    pub fn new(
        kind: TaskKind,
        tenant_id: TenantId,
        payload: Payload,
        priority: TaskPriority,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            tenant_id,
            kind,
            payload,
            priority,
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            last_error: None,
            result: None,
        }
    }

    /// Marks the task as claimed by the dispatcher.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.updated_at = now;
    }

    /// Marks the task as successfully completed, clearing `last_error`.
    pub fn mark_completed(&mut self, result: Option<serde_json::Value>, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = result;
        self.last_error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the task as failed with a descriptive cause.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.failed_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the task as cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
    }

    /// Builds the successor task for an automatic retry.
    ///
    /// The successor gets a fresh ID and `attempt + 1`; tenant, kind,
    /// payload, and attempt bound carry over. Priority is supplied by the
    /// retry coordinator (elevated by default so retried work preempts
    /// fresh low/normal submissions).
    pub fn retry_successor(&self, priority: TaskPriority, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            tenant_id: self.tenant_id,
            kind: self.kind,
            payload: self.payload.clone(),
            priority,
            status: TaskStatus::Pending,
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            last_error: self.last_error.clone(),
            result: None,
        }
    }
}

/// A template that periodically materializes new tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringDefinition {
    /// Unique identifier for this definition.
    pub id: DefinitionId,

    /// Tenant that owns this definition.
    pub tenant_id: TenantId,

    /// Kind of the tasks it materializes.
    pub kind: TaskKind,

    /// Payload copied onto each materialized task.
    pub payload: Payload,

    /// Priority copied onto each materialized task.
    pub priority: TaskPriority,

    /// Whether the definition is armed.
    ///
    /// Inactive definitions are skipped by the scheduler poll without
    /// being deleted.
    pub is_active: bool,

    /// When to fire: fixed interval, cron-like expression, or one-shot.
    pub schedule: Schedule,

    /// Next materialization instant, recomputed after every firing.
    pub next_run: DateTime<Utc>,

    /// Most recent materialization instant.
    pub last_run: Option<DateTime<Utc>>,

    /// When this definition was created.
    pub created_at: DateTime<Utc>,

    /// When this definition was last modified.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(now: DateTime<Utc>) -> Task {
        Task::new(
            TaskKind::Notification,
            TenantId::new(),
            Payload::new(),
            TaskPriority::Normal,
            3,
            now,
        )
    }

    #[test]
    fn new_task_starts_pending_with_zero_attempts() {
        let now = Utc::now();
        let task = sample_task(now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 0);
        assert_eq!(task.created_at, now);
        assert!(task.last_error.is_none());
        assert!(task.result.is_none());
    }

    #[test]
    fn transitions_bump_updated_at() {
        let created = Utc::now();
        let later = created + chrono::Duration::seconds(5);
        let mut task = sample_task(created);

        task.mark_processing(later);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.updated_at, later);

        let done = later + chrono::Duration::seconds(1);
        task.mark_completed(Some(serde_json::json!({"ok": true})), done);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, Some(done));
        assert_eq!(task.updated_at, done);
    }

    #[test]
    fn success_clears_last_error() {
        let now = Utc::now();
        let mut task = sample_task(now);
        task.mark_failed("boom", now);
        assert_eq!(task.last_error.as_deref(), Some("boom"));

        task.mark_completed(None, now);
        assert!(task.last_error.is_none());
    }

    #[test]
    fn retry_successor_gets_new_id_and_incremented_attempt() {
        let now = Utc::now();
        let mut task = sample_task(now);
        task.mark_failed("transient", now);

        let retry = task.retry_successor(TaskPriority::High, now);

        assert_ne!(retry.id, task.id);
        assert_eq!(retry.attempt, task.attempt + 1);
        assert_eq!(retry.tenant_id, task.tenant_id);
        assert_eq!(retry.kind, task.kind);
        assert_eq!(retry.priority, TaskPriority::High);
        assert_eq!(retry.status, TaskStatus::Pending);
        assert_eq!(retry.max_attempts, task.max_attempts);
    }

    #[test]
    fn priority_orders_high_before_low() {
        assert!(TaskPriority::High < TaskPriority::Normal);
        assert!(TaskPriority::Normal < TaskPriority::Low);
    }

    #[test]
    fn terminal_statuses_identified() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn kind_required_fields() {
        assert_eq!(TaskKind::WebhookRetry.required_payload_field(), Some("url"));
        assert_eq!(TaskKind::Report.required_payload_field(), None);
    }

    #[test]
    fn status_display_format() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }
}
