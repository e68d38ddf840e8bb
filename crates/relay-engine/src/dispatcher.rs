//! The periodic dispatch cycle.
//!
//! A single logical loop drives all task execution: each cycle releases
//! due retries back into their queues, then visits every task kind in
//! round-robin order and dispatches at most one task per kind. Fairness
//! across kinds falls out of the visit order; one busy queue cannot
//! starve the others within a cycle.
//!
//! Executor calls are wrapped in a timeout so an unresponsive external
//! system shows up as an ordinary failure instead of stalling the loop.

use std::{sync::Arc, time::Duration};

use relay_core::{Clock, Task, TaskKind, TaskStatus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    activity::{ActivityEntry, ActivityLog},
    error::ExecutionError,
    executor::ExecutorRegistry,
    retry::{RetryCoordinator, RetryDecision},
    store::TaskStore,
};

/// Configuration for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Interval between dispatch cycles.
    pub tick_interval: Duration,

    /// Upper bound on a single executor call.
    pub execute_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(crate::DEFAULT_TICK_INTERVAL_MS),
            execute_timeout: Duration::from_secs(crate::DEFAULT_EXECUTE_TIMEOUT_SECS),
        }
    }
}

/// Counters for dispatch loop monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    /// Completed dispatch cycles.
    pub cycles: u64,
    /// Tasks handed to an executor.
    pub dispatched: u64,
    /// Tasks that completed successfully.
    pub succeeded: u64,
    /// Tasks that failed (including timeouts and missing executors).
    pub failed: u64,
    /// Failures that produced a scheduled retry.
    pub retried: u64,
    /// Executor results discarded because the task was cancelled.
    pub discarded: u64,
}

/// Drives task execution over the shared store.
pub struct Dispatcher {
    store: Arc<RwLock<TaskStore>>,
    activity: Arc<RwLock<ActivityLog>>,
    retries: Arc<RwLock<RetryCoordinator>>,
    registry: Arc<ExecutorRegistry>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    stats: Arc<RwLock<DispatcherStats>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared engine state.
    pub fn new(
        store: Arc<RwLock<TaskStore>>,
        activity: Arc<RwLock<ActivityLog>>,
        retries: Arc<RwLock<RetryCoordinator>>,
        registry: Arc<ExecutorRegistry>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
        stats: Arc<RwLock<DispatcherStats>>,
    ) -> Self {
        Self { store, activity, retries, registry, clock, config, stats }
    }

    /// Main loop: run a cycle per tick until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            tick_ms = self.config.tick_interval.as_millis(),
            timeout_s = self.config.execute_timeout.as_secs(),
            "dispatch loop starting"
        );

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.tick_interval) => {
                    self.run_cycle().await;
                }
                () = cancel.cancelled() => break,
            }
        }

        info!("dispatch loop stopped");
    }

    /// Runs one dispatch cycle.
    ///
    /// Releases due retries first so a retry whose delay has elapsed can
    /// be picked up within the same cycle, then visits every kind once.
    pub async fn run_cycle(&self) {
        self.release_due_retries().await;

        for kind in TaskKind::ALL {
            self.dispatch_one(kind).await;
        }

        self.stats.write().await.cycles += 1;
    }

    /// Moves every due retry from the delay heap back into its queue.
    pub async fn release_due_retries(&self) {
        let now = self.clock.now_utc();
        let released = self.retries.write().await.release_due(now);
        if released.is_empty() {
            return;
        }

        let mut store = self.store.write().await;
        let mut activity = self.activity.write().await;
        for task in released {
            debug!(task_id = %task.id, kind = %task.kind, attempt = task.attempt, "retry released");
            activity.record(ActivityEntry {
                task_id: task.id,
                tenant_id: task.tenant_id,
                kind: task.kind,
                status: TaskStatus::Pending,
                message: Some(format!("retry attempt {} released", task.attempt)),
                at: now,
            });
            store.enqueue(task);
        }
    }

    /// Dispatches at most one task of the given kind.
    async fn dispatch_one(&self, kind: TaskKind) -> bool {
        let now = self.clock.now_utc();
        let claimed = self.store.write().await.claim_next(kind, now);
        let Some(task) = claimed else {
            return false;
        };

        debug!(task_id = %task.id, kind = %kind, attempt = task.attempt, "dispatching task");
        self.record(&task, TaskStatus::Processing, None).await;
        self.stats.write().await.dispatched += 1;

        let Some(executor) = self.registry.get(kind) else {
            // Configuration error: nothing to invoke, nothing to retry
            // against. The task lands in the failed log for inspection.
            warn!(task_id = %task.id, kind = %kind, "no executor registered, dropping task");
            let now = self.clock.now_utc();
            let message = format!("no executor registered for task kind '{kind}'");
            let archived =
                self.store.write().await.finish_failure(task.id, message.as_str(), now);
            if let Some(archived) = archived {
                self.record(&archived, archived.status, Some(message)).await;
            }
            self.stats.write().await.failed += 1;
            return true;
        };

        let outcome = self.execute_with_timeout(executor.as_ref(), &task).await;
        let now = self.clock.now_utc();

        match outcome {
            Ok(result) => {
                let archived = self.store.write().await.finish_success(task.id, Some(result), now);
                let Some(archived) = archived else {
                    return true;
                };
                if archived.status == TaskStatus::Cancelled {
                    debug!(task_id = %archived.id, "discarding result of cancelled task");
                    self.stats.write().await.discarded += 1;
                    return true;
                }

                debug!(task_id = %archived.id, kind = %kind, "task completed");
                self.record(&archived, TaskStatus::Completed, None).await;
                self.stats.write().await.succeeded += 1;
            },
            Err(execution_error) => {
                let message = execution_error.message;
                let archived =
                    self.store.write().await.finish_failure(task.id, message.as_str(), now);
                let Some(archived) = archived else {
                    return true;
                };
                if archived.status == TaskStatus::Cancelled {
                    debug!(task_id = %archived.id, "discarding failure of cancelled task");
                    self.stats.write().await.discarded += 1;
                    return true;
                }

                self.record(&archived, TaskStatus::Failed, Some(message.clone())).await;
                self.stats.write().await.failed += 1;

                match self.retries.write().await.handle_failure(&archived, now) {
                    RetryDecision::Scheduled { fire_at, successor } => {
                        warn!(
                            task_id = %archived.id,
                            successor = %successor,
                            attempt = archived.attempt,
                            fire_at = %fire_at,
                            error = %message,
                            "task failed, retry scheduled"
                        );
                        self.stats.write().await.retried += 1;
                    },
                    RetryDecision::Exhausted => {
                        error!(
                            task_id = %archived.id,
                            kind = %kind,
                            attempts = archived.attempt + 1,
                            error = %message,
                            "task failed permanently, retries exhausted"
                        );
                    },
                }
            },
        }

        true
    }

    /// Invokes an executor, converting a timeout into a failure.
    async fn execute_with_timeout(
        &self,
        executor: &dyn crate::executor::Executor,
        task: &Task,
    ) -> Result<serde_json::Value, ExecutionError> {
        match tokio::time::timeout(self.config.execute_timeout, executor.execute(task)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ExecutionError::new(format!(
                "executor timed out after {}s",
                self.config.execute_timeout.as_secs()
            ))),
        }
    }

    async fn record(&self, task: &Task, status: TaskStatus, message: Option<String>) {
        self.activity.write().await.record(ActivityEntry {
            task_id: task.id,
            tenant_id: task.tenant_id,
            kind: task.kind,
            status,
            message,
            at: task.updated_at,
        });
    }
}
