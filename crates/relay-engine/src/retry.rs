//! Exponential backoff retry policies and the delayed re-submission heap.
//!
//! A failed task never re-enters a queue directly. The coordinator decides
//! whether another attempt is allowed, builds a successor task with an
//! elevated priority, and parks it on a min-heap of (fire time, sequence)
//! entries drained by a single poll loop. One heap instead of one timer
//! per retry keeps cancellation semantics simple and makes the whole
//! subsystem drivable by an injected clock.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rand::Rng;
use relay_core::{Task, TaskId, TaskKind, TaskPriority, TenantId};
use serde::{Deserialize, Serialize};

/// Retry policy for one task kind.
///
/// The computed delay for attempt `n` is
/// `min(initial_delay * backoff_multiplier^n, max_delay)`, optionally
/// jittered. Pure and deterministic given the attempt count when
/// `jitter_factor` is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum automatic attempts, including the initial one.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,

    /// Upper bound on the computed delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) randomizing the delay around its
    /// computed value to spread synchronized retries.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Computes the un-jittered delay before the retry following `attempt`.
    ///
    /// Monotonically non-decreasing in `attempt` until the cap, and never
    /// above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(64)).unwrap_or(64);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let raw = self.initial_delay.as_secs_f64() * factor;
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Computes the jittered delay before the retry following `attempt`.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = apply_jitter(self.delay_for(attempt), self.jitter_factor);
        delay.min(self.max_delay)
    }
}

/// Randomizes a delay by up to `jitter_factor` in either direction.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Outcome of handing a failed task to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// A successor task was scheduled for release at `fire_at`.
    Scheduled {
        /// When the successor re-enters its pending queue.
        fire_at: DateTime<Utc>,
        /// ID of the successor task.
        successor: TaskId,
    },
    /// The attempt bound is exhausted; the task stays terminal.
    Exhausted,
}

/// One entry waiting on the delay heap.
#[derive(Debug, Clone)]
struct PendingRetry {
    fire_at: DateTime<Utc>,
    seq: u64,
    task: Task,
}

impl PartialEq for PendingRetry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for PendingRetry {}

impl PartialOrd for PendingRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRetry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at.cmp(&other.fire_at).then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Observability snapshot of one queued retry.
#[derive(Debug, Clone, Serialize)]
pub struct RetrySnapshot {
    /// Successor task waiting to be released.
    pub task_id: TaskId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Task kind.
    pub kind: TaskKind,
    /// Attempt number the successor will run as.
    pub attempt: u32,
    /// When the successor is released.
    pub fire_at: DateTime<Utc>,
}

/// Owns the delayed re-submission of failed tasks.
#[derive(Debug)]
pub struct RetryCoordinator {
    policies: HashMap<TaskKind, RetryPolicy>,
    default_policy: RetryPolicy,
    /// Priority stamped onto retry successors.
    ///
    /// Elevating retries to high priority trades queue fairness for
    /// recovery latency; it is configuration, not a fixed rule.
    retry_priority: TaskPriority,
    heap: BinaryHeap<Reverse<PendingRetry>>,
    next_seq: u64,
}

impl RetryCoordinator {
    /// Creates a coordinator with per-kind policies and a retry priority.
    pub fn new(
        policies: HashMap<TaskKind, RetryPolicy>,
        default_policy: RetryPolicy,
        retry_priority: TaskPriority,
    ) -> Self {
        Self { policies, default_policy, retry_priority, heap: BinaryHeap::new(), next_seq: 0 }
    }

    /// Policy applied to a task kind.
    pub fn policy_for(&self, kind: TaskKind) -> &RetryPolicy {
        self.policies.get(&kind).unwrap_or(&self.default_policy)
    }

    /// Decides whether a failed task gets another attempt.
    ///
    /// The bound is the task's own `max_attempts`, fixed at submission
    /// time. Within the bound, a successor is built and parked until the
    /// backoff delay elapses.
    pub fn handle_failure(&mut self, failed: &Task, now: DateTime<Utc>) -> RetryDecision {
        if failed.attempt + 1 >= failed.max_attempts {
            return RetryDecision::Exhausted;
        }

        let delay = self.policy_for(failed.kind).jittered_delay_for(failed.attempt);
        let fire_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        let successor = failed.retry_successor(self.retry_priority, now);
        let successor_id = successor.id;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(PendingRetry { fire_at, seq, task: successor }));

        RetryDecision::Scheduled { fire_at, successor: successor_id }
    }

    /// Releases every retry whose fire time has passed, in fire order.
    pub fn release_due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut released = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(entry)| entry.fire_at <= now) {
            if let Some(Reverse(entry)) = self.heap.pop() {
                released.push(entry.task);
            }
        }
        released
    }

    /// Number of retries currently waiting on the heap.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true when no retries are waiting.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Snapshot of the waiting retries, soonest first.
    pub fn snapshot(&self) -> Vec<RetrySnapshot> {
        let mut entries: Vec<&PendingRetry> =
            self.heap.iter().map(|Reverse(entry)| entry).collect();
        entries.sort();
        entries
            .into_iter()
            .map(|entry| RetrySnapshot {
                task_id: entry.task.id,
                tenant_id: entry.task.tenant_id,
                kind: entry.task.kind,
                attempt: entry.task.attempt,
                fire_at: entry.fire_at,
            })
            .collect()
    }
}
