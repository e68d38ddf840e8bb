//! In-memory task store: pending queues, in-flight set, terminal logs.
//!
//! The store owns every task in the system and enforces the core
//! invariant that a task is present in exactly one of {pending queue,
//! in-flight set, completed log, failed log} at any instant. All methods
//! are synchronous; the engine wraps the store in a single async lock and
//! mutates it only from the dispatch, retry, and submission paths.
//!
//! Terminal logs are bounded per tenant (completed 1000, failed 500 by
//! default) with oldest-first eviction, and are the only partitions the
//! periodic cleanup touches.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use relay_core::{Task, TaskId, TaskKind, TaskStatus, TenantId};
use serde::{Deserialize, Serialize};

use crate::queue::PriorityQueue;

/// Pagination window for query operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    /// Maximum entries to return.
    pub limit: usize,
    /// Entries to skip from the start of the result.
    pub offset: usize,
}

impl Page {
    /// Creates a page window.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

/// Filter for task queries. Tenant is mandatory; kind and status narrow.
#[derive(Debug, Clone, Copy)]
pub struct TaskFilter {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Restrict to one task kind.
    pub kind: Option<TaskKind>,
    /// Restrict to one lifecycle status.
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    /// Filter matching every task of a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self { tenant_id, kind: None, status: None }
    }

    /// Narrows the filter to one kind.
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Narrows the filter to one status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, task: &Task) -> bool {
        task.tenant_id == self.tenant_id
            && self.kind.map_or(true, |kind| task.kind == kind)
            && self.status.map_or(true, |status| task.status == status)
    }
}

/// Aggregate counters for a tenant's tasks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TenantStats {
    /// Total tasks across all partitions.
    pub total: usize,
    /// Counts keyed by lifecycle status.
    pub by_status: HashMap<TaskStatus, usize>,
    /// Counts keyed by task kind.
    pub by_kind: HashMap<TaskKind, usize>,
    /// Mean submission-to-completion latency over the completed log.
    pub avg_completion_ms: Option<f64>,
}

/// Which partition a task currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPartition {
    /// Waiting in a pending queue.
    Pending,
    /// Being executed.
    InFlight,
    /// In the bounded completed log.
    Completed,
    /// In the bounded failed log (includes cancelled tasks).
    Failed,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The task was still pending; it is now archived as cancelled.
    Cancelled(Task),
    /// The task is in flight; its executor result will be discarded.
    CancelRequested,
}

/// Tenant-partitioned, bounded, in-memory task collections.
#[derive(Debug)]
pub struct TaskStore {
    pending: HashMap<TaskKind, PriorityQueue<Task>>,
    in_flight: HashMap<TaskId, Task>,
    completed: HashMap<TenantId, VecDeque<Task>>,
    failed: HashMap<TenantId, VecDeque<Task>>,
    completed_cap: usize,
    failed_cap: usize,
}

impl TaskStore {
    /// Creates a store with the given per-tenant terminal log capacities.
    pub fn new(completed_cap: usize, failed_cap: usize) -> Self {
        let mut pending = HashMap::new();
        for kind in TaskKind::ALL {
            pending.insert(kind, PriorityQueue::new());
        }
        Self {
            pending,
            in_flight: HashMap::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            completed_cap,
            failed_cap,
        }
    }

    /// Enqueues a pending task into its kind's priority queue.
    pub fn enqueue(&mut self, task: Task) {
        debug_assert_eq!(task.status, TaskStatus::Pending);
        let queue = self.pending.entry(task.kind).or_default();
        queue.enqueue(task.priority, task);
    }

    /// Claims the head of a kind's queue for execution.
    ///
    /// The task moves from the pending queue to the in-flight set and is
    /// marked processing. Returns a clone for the executor call.
    pub fn claim_next(&mut self, kind: TaskKind, now: DateTime<Utc>) -> Option<Task> {
        let queue = self.pending.get_mut(&kind)?;
        let mut task = queue.dequeue()?;
        task.mark_processing(now);
        self.in_flight.insert(task.id, task.clone());
        Some(task)
    }

    /// Settles an in-flight task after a successful executor call.
    ///
    /// If the task was cancelled while in flight, the result is discarded
    /// and the task is archived as cancelled instead. Returns the archived
    /// task.
    pub fn finish_success(
        &mut self,
        id: TaskId,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        let mut task = self.in_flight.remove(&id)?;
        if task.status == TaskStatus::Cancelled {
            task.updated_at = now;
            self.archive_failed(task.clone());
            return Some(task);
        }
        task.mark_completed(result, now);
        self.archive_completed(task.clone());
        Some(task)
    }

    /// Settles an in-flight task after a failed executor call.
    ///
    /// Cancelled tasks keep their cancelled status; the failure is not
    /// recorded against them. Returns the archived task.
    pub fn finish_failure(
        &mut self,
        id: TaskId,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        let mut task = self.in_flight.remove(&id)?;
        if task.status == TaskStatus::Cancelled {
            task.updated_at = now;
        } else {
            task.mark_failed(error, now);
        }
        self.archive_failed(task.clone());
        Some(task)
    }

    /// Requests cancellation of a task.
    ///
    /// A pending task is removed from its queue outright; an in-flight
    /// task is flagged so the dispatcher discards its eventual result.
    pub fn cancel(&mut self, id: TaskId, now: DateTime<Utc>) -> Option<CancelOutcome> {
        let mut pulled = None;
        for queue in self.pending.values_mut() {
            if let Some(task) = queue.remove_where(|task| task.id == id) {
                pulled = Some(task);
                break;
            }
        }
        if let Some(mut task) = pulled {
            task.mark_cancelled(now);
            self.archive_failed(task.clone());
            return Some(CancelOutcome::Cancelled(task));
        }

        if let Some(task) = self.in_flight.get_mut(&id) {
            task.mark_cancelled(now);
            return Some(CancelOutcome::CancelRequested);
        }
        None
    }

    /// Appends a task to the bounded completed log.
    pub fn archive_completed(&mut self, task: Task) {
        let log = self.completed.entry(task.tenant_id).or_default();
        if log.len() >= self.completed_cap {
            log.pop_front();
        }
        log.push_back(task);
    }

    /// Appends a task to the bounded failed log.
    pub fn archive_failed(&mut self, task: Task) {
        let log = self.failed.entry(task.tenant_id).or_default();
        if log.len() >= self.failed_cap {
            log.pop_front();
        }
        log.push_back(task);
    }

    /// Drains a tenant's failed tasks for manual reprocessing.
    ///
    /// Cancelled tasks stay archived; only genuine failures are replayed.
    pub fn take_failed(&mut self, tenant_id: TenantId, kind: Option<TaskKind>) -> Vec<Task> {
        let Some(log) = self.failed.get_mut(&tenant_id) else {
            return Vec::new();
        };
        let mut taken = Vec::new();
        let mut kept = VecDeque::new();
        for task in log.drain(..) {
            let eligible = task.status == TaskStatus::Failed
                && kind.map_or(true, |wanted| task.kind == wanted);
            if eligible {
                taken.push(task);
            } else {
                kept.push_back(task);
            }
        }
        *log = kept;
        taken
    }

    /// Looks up a task by ID across all partitions.
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        if let Some(task) = self.in_flight.get(&id) {
            return Some(task);
        }
        for queue in self.pending.values() {
            if let Some(task) = queue.iter().find(|task| task.id == id) {
                return Some(task);
            }
        }
        for log in self.completed.values() {
            if let Some(task) = log.iter().find(|task| task.id == id) {
                return Some(task);
            }
        }
        for log in self.failed.values() {
            if let Some(task) = log.iter().find(|task| task.id == id) {
                return Some(task);
            }
        }
        None
    }

    /// Which partition holds a task, if any.
    ///
    /// Debug builds assert the exactly-one-partition invariant.
    pub fn locate(&self, id: TaskId) -> Option<TaskPartition> {
        let in_pending =
            self.pending.values().any(|queue| queue.iter().any(|task| task.id == id));
        let in_flight = self.in_flight.contains_key(&id);
        let in_completed =
            self.completed.values().any(|log| log.iter().any(|task| task.id == id));
        let in_failed = self.failed.values().any(|log| log.iter().any(|task| task.id == id));

        let memberships =
            usize::from(in_pending) + usize::from(in_flight) + usize::from(in_completed)
                + usize::from(in_failed);
        debug_assert!(memberships <= 1, "task {id} present in {memberships} partitions");

        if in_pending {
            Some(TaskPartition::Pending)
        } else if in_flight {
            Some(TaskPartition::InFlight)
        } else if in_completed {
            Some(TaskPartition::Completed)
        } else if in_failed {
            Some(TaskPartition::Failed)
        } else {
            None
        }
    }

    /// Lists matching tasks across all partitions, newest first.
    pub fn list(&self, filter: TaskFilter, page: Page) -> Vec<Task> {
        let mut matches: Vec<Task> =
            self.iter_all().filter(|task| filter.matches(task)).cloned().collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.into_iter().skip(page.offset).take(page.limit).collect()
    }

    /// Pending queue depth per kind.
    pub fn queue_depths(&self) -> Vec<(TaskKind, usize)> {
        TaskKind::ALL
            .iter()
            .map(|kind| (*kind, self.pending.get(kind).map_or(0, PriorityQueue::len)))
            .collect()
    }

    /// Number of tasks currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Aggregate counters for a tenant.
    pub fn stats(&self, tenant_id: TenantId) -> TenantStats {
        let mut stats = TenantStats::default();
        for task in self.iter_all().filter(|task| task.tenant_id == tenant_id) {
            stats.total += 1;
            *stats.by_status.entry(task.status).or_default() += 1;
            *stats.by_kind.entry(task.kind).or_default() += 1;
        }

        if let Some(log) = self.completed.get(&tenant_id) {
            let latencies: Vec<i64> = log
                .iter()
                .filter_map(|task| {
                    task.completed_at
                        .map(|done| (done - task.created_at).num_milliseconds())
                })
                .collect();
            if !latencies.is_empty() {
                let sum: i64 = latencies.iter().sum();
                stats.avg_completion_ms = Some(sum as f64 / latencies.len() as f64);
            }
        }

        stats
    }

    /// Purges terminal tasks older than the cutoff. Returns the count
    /// removed.
    ///
    /// Only the completed and failed logs are touched; pending and
    /// in-flight tasks are never evicted by cleanup.
    pub fn cleanup(&mut self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;

        if let Some(log) = self.completed.get_mut(&tenant_id) {
            let before = log.len();
            log.retain(|task| terminal_at(task) >= cutoff);
            removed += before - log.len();
        }
        if let Some(log) = self.failed.get_mut(&tenant_id) {
            let before = log.len();
            log.retain(|task| terminal_at(task) >= cutoff);
            removed += before - log.len();
        }

        removed
    }

    fn iter_all(&self) -> impl Iterator<Item = &Task> {
        self.pending
            .values()
            .flat_map(PriorityQueue::iter)
            .chain(self.in_flight.values())
            .chain(self.completed.values().flatten())
            .chain(self.failed.values().flatten())
    }
}

/// Timestamp a terminal task is aged by during cleanup.
fn terminal_at(task: &Task) -> DateTime<Utc> {
    task.completed_at.or(task.failed_at).unwrap_or(task.updated_at)
}
