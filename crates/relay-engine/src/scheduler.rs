//! Recurring task definitions and due-instant tracking.
//!
//! The scheduler turns recurring definitions into one-shot tasks at the
//! right time. Instead of one timer per definition, a single poll loop
//! (driven by the engine) asks for the definitions due at `now`,
//! materializes each through the ordinary submission path, and re-arms by
//! recomputing `next_run`. Inactive definitions are simply skipped by the
//! poll, so deactivation needs no timer cancellation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use relay_core::{
    CoreError, DefinitionId, Payload, RecurringDefinition, Schedule, TaskKind, TaskPriority,
    TenantId,
};

/// Input for scheduling a new recurring definition.
#[derive(Debug, Clone)]
pub struct NewDefinition {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Kind of the materialized tasks.
    pub kind: TaskKind,
    /// Payload copied onto each materialized task.
    pub payload: Payload,
    /// Priority of the materialized tasks.
    pub priority: TaskPriority,
    /// When the definition fires.
    pub schedule: Schedule,
}

/// Registry of recurring definitions with due-instant bookkeeping.
#[derive(Debug, Default)]
pub struct Scheduler {
    definitions: HashMap<DefinitionId, RecurringDefinition>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, computing its first run from `now`.
    pub fn schedule(
        &mut self,
        spec: NewDefinition,
        now: DateTime<Utc>,
    ) -> &RecurringDefinition {
        let next_run = spec.schedule.first_run(now);
        let definition = RecurringDefinition {
            id: DefinitionId::new(),
            tenant_id: spec.tenant_id,
            kind: spec.kind,
            payload: spec.payload,
            priority: spec.priority,
            is_active: true,
            schedule: spec.schedule,
            next_run,
            last_run: None,
            created_at: now,
            updated_at: now,
        };
        let id = definition.id;
        self.definitions.insert(id, definition);
        self.definitions.get(&id).expect("definition just inserted")
    }

    /// Removes a definition entirely.
    pub fn unschedule(&mut self, id: DefinitionId) -> Result<RecurringDefinition, CoreError> {
        self.definitions
            .remove(&id)
            .ok_or_else(|| CoreError::not_found(format!("definition {id}")))
    }

    /// Arms or disarms a definition without deleting it.
    ///
    /// Re-activation recomputes `next_run` from `now` so a long-dormant
    /// definition does not fire immediately for every missed instant.
    pub fn set_active(
        &mut self,
        id: DefinitionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<&RecurringDefinition, CoreError> {
        let definition = self
            .definitions
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("definition {id}")))?;

        if active && !definition.is_active {
            definition.next_run = definition.schedule.first_run(now);
        }
        definition.is_active = active;
        definition.updated_at = now;
        Ok(definition)
    }

    /// Looks up a definition.
    pub fn get(&self, id: DefinitionId) -> Option<&RecurringDefinition> {
        self.definitions.get(&id)
    }

    /// Lists a tenant's definitions.
    pub fn list(&self, tenant_id: TenantId) -> Vec<RecurringDefinition> {
        let mut definitions: Vec<_> = self
            .definitions
            .values()
            .filter(|definition| definition.tenant_id == tenant_id)
            .cloned()
            .collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        definitions
    }

    /// IDs of active definitions whose `next_run` has arrived.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DefinitionId> {
        let mut due: Vec<_> = self
            .definitions
            .values()
            .filter(|definition| definition.is_active && definition.next_run <= now)
            .map(|definition| (definition.next_run, definition.id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Records a materialization and re-arms the definition.
    ///
    /// `next_run` moves strictly past `now`, so the same due instant can
    /// never materialize twice. One-shot definitions are deactivated
    /// instead of re-armed.
    pub fn mark_materialized(&mut self, id: DefinitionId, now: DateTime<Utc>) {
        let Some(definition) = self.definitions.get_mut(&id) else {
            return;
        };
        definition.last_run = Some(now);
        definition.updated_at = now;
        match definition.schedule.next_after(now) {
            Some(next_run) => definition.next_run = next_run,
            None => definition.is_active = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    fn spec(schedule: Schedule) -> NewDefinition {
        NewDefinition {
            tenant_id: TenantId::new(),
            kind: TaskKind::Report,
            payload: Payload::new(),
            priority: TaskPriority::Normal,
            schedule,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn schedule_computes_first_run() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);

        let definition = scheduler
            .schedule(spec(Schedule::interval(Duration::from_secs(3600)).unwrap()), now);

        assert!(definition.is_active);
        assert_eq!(definition.next_run, now + chrono::Duration::seconds(3600));
        assert!(definition.last_run.is_none());
    }

    #[test]
    fn due_skips_inactive_and_future() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);

        let due_id =
            scheduler.schedule(spec(Schedule::once(at(8, 0))), now).id;
        let future_id =
            scheduler.schedule(spec(Schedule::once(at(10, 0))), now).id;
        let inactive_id =
            scheduler.schedule(spec(Schedule::once(at(8, 0))), now).id;
        scheduler.set_active(inactive_id, false, now).unwrap();

        let due = scheduler.due(now);
        assert_eq!(due, vec![due_id]);
        assert!(!due.contains(&future_id));
    }

    #[test]
    fn mark_materialized_rearms_interval() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);
        let id = scheduler
            .schedule(spec(Schedule::interval(Duration::from_secs(60)).unwrap()), now)
            .id;

        let fire = now + chrono::Duration::seconds(60);
        scheduler.mark_materialized(id, fire);

        let definition = scheduler.get(id).unwrap();
        assert_eq!(definition.last_run, Some(fire));
        assert_eq!(definition.next_run, fire + chrono::Duration::seconds(60));
        assert!(definition.is_active);
    }

    #[test]
    fn mark_materialized_deactivates_once() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);
        let id = scheduler.schedule(spec(Schedule::once(at(9, 30))), now).id;

        scheduler.mark_materialized(id, at(9, 30));

        let definition = scheduler.get(id).unwrap();
        assert!(!definition.is_active);
        assert!(scheduler.due(at(23, 0)).is_empty());
    }

    #[test]
    fn same_due_instant_never_materializes_twice() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);
        let id = scheduler
            .schedule(spec(Schedule::interval(Duration::from_secs(60)).unwrap()), now)
            .id;

        let fire = now + chrono::Duration::seconds(60);
        assert_eq!(scheduler.due(fire), vec![id]);
        scheduler.mark_materialized(id, fire);

        // Same instant again: nothing is due.
        assert!(scheduler.due(fire).is_empty());
        let definition = scheduler.get(id).unwrap();
        assert!(definition.next_run > fire);
    }

    #[test]
    fn reactivation_recomputes_next_run() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);
        let id = scheduler
            .schedule(spec(Schedule::interval(Duration::from_secs(60)).unwrap()), now)
            .id;

        scheduler.set_active(id, false, at(9, 5)).unwrap();
        let later = at(12, 0);
        scheduler.set_active(id, true, later).unwrap();

        let definition = scheduler.get(id).unwrap();
        assert_eq!(definition.next_run, later + chrono::Duration::seconds(60));
    }

    #[test]
    fn unschedule_removes_definition() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);
        let id = scheduler.schedule(spec(Schedule::once(at(10, 0))), now).id;

        scheduler.unschedule(id).unwrap();
        assert!(scheduler.get(id).is_none());
        assert!(scheduler.unschedule(id).is_err());
    }

    #[test]
    fn list_is_tenant_scoped() {
        let mut scheduler = Scheduler::new();
        let now = at(9, 0);
        let mine = spec(Schedule::once(at(10, 0)));
        let tenant_id = mine.tenant_id;
        scheduler.schedule(mine, now);
        scheduler.schedule(spec(Schedule::once(at(10, 0))), now);

        assert_eq!(scheduler.list(tenant_id).len(), 1);
    }
}
