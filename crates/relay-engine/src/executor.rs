//! Executor trait and registration.
//!
//! Executors are the external collaborators that actually perform a
//! task's effect: a webhook POST, a vendor API call, a cleanup sweep. The
//! dispatcher looks them up by task kind through a registry built once at
//! startup and read-only thereafter.

use std::{collections::HashMap, fmt, sync::Arc};

use relay_core::{Task, TaskKind};

use crate::error::ExecutionError;

/// External collaborator invoked by the dispatcher to perform a task.
///
/// # Idempotency contract
///
/// The dispatcher guarantees at-least-once invocation, not exactly-once: a
/// task may be replayed through `execute` after a failure or a manual
/// reprocess. Implementations must tolerate duplicate invocations of the
/// same logical operation, typically via an idempotency key carried in the
/// payload.
///
/// On failure, implementations must surface a descriptive error message;
/// it becomes the task's `last_error` and feeds operator diagnostics.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Performs the task's effect, returning an opaque result value.
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, ExecutionError>;
}

/// Read-only mapping from task kind to executor.
///
/// Built once during startup via [`ExecutorRegistry::builder`] and never
/// mutated afterwards, so the dispatch loop can resolve executors without
/// synchronization.
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Starts building a registry.
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder { executors: HashMap::new() }
    }

    /// Resolves the executor for a task kind, if one is registered.
    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn Executor>> {
        self.executors.get(&kind)
    }

    /// Kinds with a registered executor.
    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry").field("kinds", &self.registered_kinds()).finish()
    }
}

/// Builder for [`ExecutorRegistry`].
pub struct ExecutorRegistryBuilder {
    executors: HashMap<TaskKind, Arc<dyn Executor>>,
}

impl ExecutorRegistryBuilder {
    /// Registers an executor for a task kind, replacing any previous one.
    pub fn register(mut self, kind: TaskKind, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Finalizes the registry.
    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry { executors: self.executors }
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{Payload, TaskPriority, TenantId};

    use super::*;

    #[derive(Debug)]
    struct EchoExecutor;

    #[async_trait::async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, task: &Task) -> Result<serde_json::Value, ExecutionError> {
            Ok(serde_json::json!({ "kind": task.kind.as_str() }))
        }
    }

    #[test]
    fn registry_resolves_registered_kind() {
        let registry = ExecutorRegistry::builder()
            .register(TaskKind::Notification, Arc::new(EchoExecutor))
            .build();

        assert!(registry.get(TaskKind::Notification).is_some());
        assert!(registry.get(TaskKind::Report).is_none());
        assert_eq!(registry.registered_kinds(), vec![TaskKind::Notification]);
    }

    #[tokio::test]
    async fn executor_receives_task() {
        let registry = ExecutorRegistry::builder()
            .register(TaskKind::Report, Arc::new(EchoExecutor))
            .build();
        let task = Task::new(
            TaskKind::Report,
            TenantId::new(),
            Payload::new(),
            TaskPriority::Normal,
            3,
            chrono::Utc::now(),
        );

        let executor = registry.get(TaskKind::Report).unwrap();
        let result = executor.execute(&task).await.unwrap();
        assert_eq!(result["kind"], "report");
    }
}
