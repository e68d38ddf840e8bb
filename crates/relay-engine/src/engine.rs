//! Engine facade: submission, scheduling, queries, lifecycle.
//!
//! [`DispatchEngine`] wires the task store, activity log, retry
//! coordinator, scheduler, and dispatcher together and owns the three
//! background loops (dispatch, retry release, scheduler poll). Submission
//! is fire-and-forget once accepted: recoverable failures are absorbed by
//! the dispatch pipeline and only validation or configuration problems
//! surface synchronously.

use std::{collections::HashMap, sync::Arc, time::Duration};

use relay_core::{
    Clock, DefinitionId, Payload, RecurringDefinition, Task, TaskId, TaskKind, TaskPriority,
    TaskStatus, TenantId,
};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    activity::{ActivityEntry, ActivityLog},
    dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats},
    error::{EngineError, Result},
    executor::ExecutorRegistry,
    retry::{RetryCoordinator, RetryPolicy, RetrySnapshot},
    scheduler::{NewDefinition, Scheduler},
    store::{CancelOutcome, Page, TaskFilter, TaskStore, TenantStats},
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between dispatch cycles.
    pub tick_interval: Duration,

    /// Upper bound on a single executor call.
    pub execute_timeout: Duration,

    /// How often the retry heap is polled for due entries.
    pub retry_poll_interval: Duration,

    /// How often the scheduler looks for due definitions.
    pub scheduler_poll_interval: Duration,

    /// Completed-log capacity per tenant.
    pub completed_log_cap: usize,

    /// Failed-log capacity per tenant.
    pub failed_log_cap: usize,

    /// Activity-log capacity per tenant.
    pub activity_log_cap: usize,

    /// Priority stamped onto retry successors.
    pub retry_priority: TaskPriority,

    /// Per-kind retry policies; kinds not listed use the default.
    pub retry_policies: HashMap<TaskKind, RetryPolicy>,

    /// Fallback retry policy.
    pub default_retry_policy: RetryPolicy,

    /// Maximum time to wait for loops to stop on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(crate::DEFAULT_TICK_INTERVAL_MS),
            execute_timeout: Duration::from_secs(crate::DEFAULT_EXECUTE_TIMEOUT_SECS),
            retry_poll_interval: Duration::from_millis(250),
            scheduler_poll_interval: Duration::from_secs(1),
            completed_log_cap: crate::DEFAULT_COMPLETED_LOG_CAP,
            failed_log_cap: crate::DEFAULT_FAILED_LOG_CAP,
            activity_log_cap: 2_000,
            retry_priority: TaskPriority::High,
            retry_policies: HashMap::new(),
            default_retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome counts of a manual reprocess run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReprocessReport {
    /// Tasks replayed through their executor.
    pub replayed: usize,
    /// Replays that completed successfully.
    pub succeeded: usize,
    /// Replays that failed again.
    pub failed: usize,
}

/// State shared between the engine facade and its background loops.
struct EngineShared {
    store: Arc<RwLock<TaskStore>>,
    activity: Arc<RwLock<ActivityLog>>,
    retries: Arc<RwLock<RetryCoordinator>>,
    scheduler: Arc<RwLock<Scheduler>>,
    registry: Arc<ExecutorRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl EngineShared {
    /// Rejects a submission whose payload is missing its kind's required
    /// field. Checked synchronously; an invalid task never enters a queue.
    fn validate_payload(kind: TaskKind, payload: &Payload) -> Result<()> {
        let Some(field) = kind.required_payload_field() else {
            return Ok(());
        };
        match payload.get(field) {
            Some(serde_json::Value::String(value)) if !value.is_empty() => Ok(()),
            Some(serde_json::Value::Null) | None => Err(EngineError::validation(format!(
                "task kind '{kind}' requires payload field '{field}'"
            ))),
            Some(serde_json::Value::String(_)) => Err(EngineError::validation(format!(
                "payload field '{field}' must not be empty"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Validates and enqueues a prepared task.
    async fn submit_task(&self, task: Task) -> Result<Task> {
        Self::validate_payload(task.kind, &task.payload)?;

        debug!(
            task_id = %task.id,
            tenant_id = %task.tenant_id,
            kind = %task.kind,
            priority = %task.priority,
            "task submitted"
        );

        self.activity.write().await.record(ActivityEntry {
            task_id: task.id,
            tenant_id: task.tenant_id,
            kind: task.kind,
            status: TaskStatus::Pending,
            message: Some("submitted".to_string()),
            at: task.created_at,
        });
        self.store.write().await.enqueue(task.clone());
        Ok(task)
    }

    /// Materializes every due definition into a task.
    async fn run_scheduler_tick(&self) {
        let now = self.clock.now_utc();
        let due = self.scheduler.read().await.due(now);

        for id in due {
            let Some(definition) = self.scheduler.read().await.get(id).cloned() else {
                continue;
            };

            let max_attempts = self.max_attempts_for(definition.kind).await;
            let task = Task::new(
                definition.kind,
                definition.tenant_id,
                definition.payload.clone(),
                definition.priority,
                max_attempts,
                now,
            );

            match self.submit_task(task).await {
                Ok(task) => {
                    debug!(
                        definition_id = %id,
                        task_id = %task.id,
                        kind = %task.kind,
                        "recurring definition materialized"
                    );
                },
                Err(error) => {
                    // Payloads are validated at schedule() time, so this
                    // only fires if validation rules tightened since.
                    warn!(definition_id = %id, error = %error, "materialization rejected");
                },
            }

            self.scheduler.write().await.mark_materialized(id, now);
        }
    }

    async fn max_attempts_for(&self, kind: TaskKind) -> u32 {
        self.retries.read().await.policy_for(kind).max_retries
    }
}

/// The dispatch engine: one handle for submission, scheduling, queries,
/// and lifecycle.
pub struct DispatchEngine {
    shared: Arc<EngineShared>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<RwLock<DispatcherStats>>,
    cancel: CancellationToken,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchEngine {
    /// Creates an engine over a registry of executors.
    pub fn new(registry: ExecutorRegistry, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(RwLock::new(TaskStore::new(
            config.completed_log_cap,
            config.failed_log_cap,
        )));
        let activity = Arc::new(RwLock::new(ActivityLog::new(config.activity_log_cap)));
        let retries = Arc::new(RwLock::new(RetryCoordinator::new(
            config.retry_policies.clone(),
            config.default_retry_policy.clone(),
            config.retry_priority,
        )));
        let scheduler = Arc::new(RwLock::new(Scheduler::new()));
        let registry = Arc::new(registry);
        let stats = Arc::new(RwLock::new(DispatcherStats::default()));

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            activity.clone(),
            retries.clone(),
            registry.clone(),
            clock.clone(),
            DispatcherConfig {
                tick_interval: config.tick_interval,
                execute_timeout: config.execute_timeout,
            },
            stats.clone(),
        ));

        let shared = Arc::new(EngineShared {
            store,
            activity,
            retries,
            scheduler,
            registry,
            clock,
            config,
        });

        Self {
            shared,
            dispatcher,
            stats,
            cancel: CancellationToken::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    // ── Submission ──────────────────────────────────────────────────────

    /// Submits a task for dispatch. Fire-and-forget once accepted.
    pub async fn submit(
        &self,
        kind: TaskKind,
        tenant_id: TenantId,
        payload: Payload,
        priority: Option<TaskPriority>,
    ) -> Result<Task> {
        let now = self.shared.clock.now_utc();
        let max_attempts = self.shared.max_attempts_for(kind).await;
        let task = Task::new(
            kind,
            tenant_id,
            payload,
            priority.unwrap_or(TaskPriority::Normal),
            max_attempts,
            now,
        );
        self.shared.submit_task(task).await
    }

    /// Submits a fully prepared task, keeping its attempt bound.
    ///
    /// Used by callers that stamp their own `max_attempts`, e.g. webhook
    /// fan-out where the bound comes from the endpoint configuration.
    pub async fn submit_task(&self, task: Task) -> Result<Task> {
        self.shared.submit_task(task).await
    }

    /// Requests cancellation of a task.
    pub async fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        let now = self.shared.clock.now_utc();
        let outcome = self.shared.store.write().await.cancel(id, now);

        match outcome {
            Some(outcome) => {
                let (message, task_info) = match &outcome {
                    CancelOutcome::Cancelled(task) => {
                        ("cancelled before dispatch".to_string(), (task.tenant_id, task.kind))
                    },
                    CancelOutcome::CancelRequested => {
                        let store = self.shared.store.read().await;
                        let task = store.get(id).ok_or(EngineError::TaskNotFound { id })?;
                        (
                            "cancellation requested while in flight".to_string(),
                            (task.tenant_id, task.kind),
                        )
                    },
                };
                self.shared.activity.write().await.record(ActivityEntry {
                    task_id: id,
                    tenant_id: task_info.0,
                    kind: task_info.1,
                    status: TaskStatus::Cancelled,
                    message: Some(message),
                    at: now,
                });
                Ok(outcome)
            },
            None => {
                let store = self.shared.store.read().await;
                match store.get(id) {
                    Some(task) if task.status.is_terminal() => {
                        Err(EngineError::TaskTerminal { id })
                    },
                    _ => Err(EngineError::TaskNotFound { id }),
                }
            },
        }
    }

    /// Replays a tenant's failed backlog through the executors.
    ///
    /// Operator-triggered recovery: runs synchronously, ignores retry
    /// policies and attempt bounds, and is a different code path from
    /// automatic retry.
    pub async fn reprocess_failed(
        &self,
        tenant_id: TenantId,
        kind: Option<TaskKind>,
    ) -> ReprocessReport {
        let backlog = self.shared.store.write().await.take_failed(tenant_id, kind);
        let mut report = ReprocessReport::default();

        for mut task in backlog {
            report.replayed += 1;
            let now = self.shared.clock.now_utc();

            let Some(executor) = self.shared.registry.get(task.kind) else {
                warn!(task_id = %task.id, kind = %task.kind, "reprocess skipped, no executor");
                task.mark_failed("no executor registered", now);
                report.failed += 1;
                self.shared.store.write().await.archive_failed(task);
                continue;
            };

            let outcome = tokio::time::timeout(
                self.shared.config.execute_timeout,
                executor.execute(&task),
            )
            .await;

            let now = self.shared.clock.now_utc();
            match outcome {
                Ok(Ok(result)) => {
                    task.mark_completed(Some(result), now);
                    report.succeeded += 1;
                    self.record_transition(&task, TaskStatus::Completed, Some("reprocessed"))
                        .await;
                    self.shared.store.write().await.archive_completed(task);
                },
                Ok(Err(error)) => {
                    task.mark_failed(error.message.clone(), now);
                    report.failed += 1;
                    self.record_transition(&task, TaskStatus::Failed, Some("reprocess failed"))
                        .await;
                    self.shared.store.write().await.archive_failed(task);
                },
                Err(_elapsed) => {
                    task.mark_failed("executor timed out during reprocess", now);
                    report.failed += 1;
                    self.record_transition(&task, TaskStatus::Failed, Some("reprocess failed"))
                        .await;
                    self.shared.store.write().await.archive_failed(task);
                },
            }
        }

        info!(
            tenant_id = %tenant_id,
            replayed = report.replayed,
            succeeded = report.succeeded,
            failed = report.failed,
            "manual reprocess finished"
        );
        report
    }

    // ── Scheduling ──────────────────────────────────────────────────────

    /// Registers a recurring definition.
    pub async fn schedule(&self, spec: NewDefinition) -> Result<RecurringDefinition> {
        EngineShared::validate_payload(spec.kind, &spec.payload)?;
        let now = self.shared.clock.now_utc();
        let definition = self.shared.scheduler.write().await.schedule(spec, now).clone();
        info!(
            definition_id = %definition.id,
            kind = %definition.kind,
            schedule = %definition.schedule,
            next_run = %definition.next_run,
            "recurring definition scheduled"
        );
        Ok(definition)
    }

    /// Removes a recurring definition.
    pub async fn unschedule(&self, id: DefinitionId) -> Result<RecurringDefinition> {
        Ok(self.shared.scheduler.write().await.unschedule(id)?)
    }

    /// Re-arms a deactivated definition.
    pub async fn activate(&self, id: DefinitionId) -> Result<RecurringDefinition> {
        let now = self.shared.clock.now_utc();
        Ok(self.shared.scheduler.write().await.set_active(id, true, now)?.clone())
    }

    /// Disarms a definition without deleting it.
    pub async fn deactivate(&self, id: DefinitionId) -> Result<RecurringDefinition> {
        let now = self.shared.clock.now_utc();
        Ok(self.shared.scheduler.write().await.set_active(id, false, now)?.clone())
    }

    /// Materializes a definition immediately, leaving its schedule alone.
    pub async fn execute_now(&self, id: DefinitionId) -> Result<Task> {
        let definition = self
            .shared
            .scheduler
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| relay_core::CoreError::not_found(format!("definition {id}")))?;

        let now = self.shared.clock.now_utc();
        let max_attempts = self.shared.max_attempts_for(definition.kind).await;
        let task = Task::new(
            definition.kind,
            definition.tenant_id,
            definition.payload,
            definition.priority,
            max_attempts,
            now,
        );
        self.shared.submit_task(task).await
    }

    /// Lists a tenant's recurring definitions.
    pub async fn list_definitions(&self, tenant_id: TenantId) -> Vec<RecurringDefinition> {
        self.shared.scheduler.read().await.list(tenant_id)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Looks up a task across all partitions.
    pub async fn get_task(&self, id: TaskId) -> Option<Task> {
        self.shared.store.read().await.get(id).cloned()
    }

    /// Lists matching tasks, newest first.
    pub async fn list_tasks(&self, filter: TaskFilter, page: Page) -> Vec<Task> {
        self.shared.store.read().await.list(filter, page)
    }

    /// Pending queue depth per task kind.
    pub async fn queue_depths(&self) -> Vec<(TaskKind, usize)> {
        self.shared.store.read().await.queue_depths()
    }

    /// Snapshot of retries waiting on the delay heap, soonest first.
    pub async fn retry_queue(&self) -> Vec<RetrySnapshot> {
        self.shared.retries.read().await.snapshot()
    }

    /// Aggregate counters for a tenant.
    pub async fn stats(&self, tenant_id: TenantId) -> TenantStats {
        self.shared.store.read().await.stats(tenant_id)
    }

    /// Dispatch loop counters.
    pub async fn dispatcher_stats(&self) -> DispatcherStats {
        *self.stats.read().await
    }

    /// A page of a tenant's activity log, newest first.
    pub async fn activity(&self, tenant_id: TenantId, page: Page) -> Vec<ActivityEntry> {
        self.shared.activity.read().await.for_tenant(tenant_id, page)
    }

    /// Purges terminal tasks older than the horizon. Returns the count
    /// removed.
    pub async fn cleanup(&self, tenant_id: TenantId, older_than: Duration) -> usize {
        let cutoff = self.shared.clock.now_utc()
            - chrono::Duration::from_std(older_than).unwrap_or_default();
        let removed = self.shared.store.write().await.cleanup(tenant_id, cutoff);
        info!(tenant_id = %tenant_id, removed, "cleanup finished");
        removed
    }

    // ── Manual stepping (used by tests and embedders) ───────────────────

    /// Runs one dispatch cycle outside the background loop.
    pub async fn run_cycle(&self) {
        self.dispatcher.run_cycle().await;
    }

    /// Runs one scheduler poll outside the background loop.
    pub async fn run_scheduler_tick(&self) {
        self.shared.run_scheduler_tick().await;
    }

    /// Releases due retries into their queues without dispatching.
    pub async fn release_due_retries(&self) {
        self.dispatcher.release_due_retries().await;
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawns the dispatch, retry release, and scheduler loops.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        info!(
            executors = ?self.shared.registry.registered_kinds(),
            tick_ms = self.shared.config.tick_interval.as_millis(),
            "dispatch engine starting"
        );

        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.run(cancel).await;
        }));

        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        let clock = self.shared.clock.clone();
        let interval = self.shared.config.retry_poll_interval;
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = clock.sleep(interval) => dispatcher.release_due_retries().await,
                    () = cancel.cancelled() => break,
                }
            }
        }));

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            let interval = shared.config.scheduler_poll_interval;
            loop {
                tokio::select! {
                    () = shared.clock.sleep(interval) => shared.run_scheduler_tick().await,
                    () = cancel.cancelled() => break,
                }
            }
        }));

        info!("dispatch engine started");
    }

    /// Stops the loops and waits for them within the shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        info!("dispatch engine shutting down");
        self.cancel.cancel();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        let timeout = self.shared.config.shutdown_timeout;

        let joined = tokio::time::timeout(timeout, async {
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(error = %error, "engine loop panicked during shutdown");
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!("dispatch engine stopped");
                Ok(())
            },
            Err(_elapsed) => Err(EngineError::ShutdownTimeout { timeout }),
        }
    }

    async fn record_transition(&self, task: &Task, status: TaskStatus, note: Option<&str>) {
        self.shared.activity.write().await.record(ActivityEntry {
            task_id: task.id,
            tenant_id: task.tenant_id,
            kind: task.kind,
            status,
            message: note.map(str::to_string),
            at: task.updated_at,
        });
    }
}
