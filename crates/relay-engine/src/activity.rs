//! Append-only activity log of task lifecycle transitions.
//!
//! Bounded per tenant with oldest-first eviction. Entries are immutable
//! once recorded; the log exists for observability and is never consulted
//! by dispatch decisions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use relay_core::{TaskId, TaskKind, TaskStatus, TenantId};
use serde::{Deserialize, Serialize};

use crate::store::Page;

/// One recorded lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Task the transition belongs to.
    pub task_id: TaskId,

    /// Tenant partition for the entry.
    pub tenant_id: TenantId,

    /// Kind of the task.
    pub kind: TaskKind,

    /// Status the task transitioned into.
    pub status: TaskStatus,

    /// Optional context, e.g. the failure cause or a retry note.
    pub message: Option<String>,

    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// Bounded, tenant-partitioned transition log.
#[derive(Debug)]
pub struct ActivityLog {
    entries: HashMap<TenantId, VecDeque<ActivityEntry>>,
    capacity_per_tenant: usize,
}

impl ActivityLog {
    /// Creates a log with the given per-tenant capacity.
    pub fn new(capacity_per_tenant: usize) -> Self {
        Self { entries: HashMap::new(), capacity_per_tenant }
    }

    /// Appends an entry, evicting the oldest if the tenant is at capacity.
    pub fn record(&mut self, entry: ActivityEntry) {
        let log = self.entries.entry(entry.tenant_id).or_default();
        if log.len() >= self.capacity_per_tenant {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Returns a page of a tenant's entries, newest first.
    pub fn for_tenant(&self, tenant_id: TenantId, page: Page) -> Vec<ActivityEntry> {
        let Some(log) = self.entries.get(&tenant_id) else {
            return Vec::new();
        };
        log.iter().rev().skip(page.offset).take(page.limit).cloned().collect()
    }

    /// Total entries currently retained for a tenant.
    pub fn len_for_tenant(&self, tenant_id: TenantId) -> usize {
        self.entries.get(&tenant_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tenant_id: TenantId, status: TaskStatus, at: DateTime<Utc>) -> ActivityEntry {
        ActivityEntry {
            task_id: TaskId::new(),
            tenant_id,
            kind: TaskKind::Notification,
            status,
            message: None,
            at,
        }
    }

    #[test]
    fn records_and_reads_newest_first() {
        let mut log = ActivityLog::new(10);
        let tenant = TenantId::new();
        let base = Utc::now();

        log.record(entry(tenant, TaskStatus::Pending, base));
        log.record(entry(tenant, TaskStatus::Processing, base + chrono::Duration::seconds(1)));
        log.record(entry(tenant, TaskStatus::Completed, base + chrono::Duration::seconds(2)));

        let page = log.for_tenant(tenant, Page::new(10, 0));
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].status, TaskStatus::Completed);
        assert_eq!(page[2].status, TaskStatus::Pending);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut log = ActivityLog::new(2);
        let tenant = TenantId::new();
        let base = Utc::now();

        log.record(entry(tenant, TaskStatus::Pending, base));
        log.record(entry(tenant, TaskStatus::Processing, base));
        log.record(entry(tenant, TaskStatus::Completed, base));

        assert_eq!(log.len_for_tenant(tenant), 2);
        let page = log.for_tenant(tenant, Page::new(10, 0));
        assert_eq!(page[0].status, TaskStatus::Completed);
        assert_eq!(page[1].status, TaskStatus::Processing);
    }

    #[test]
    fn pagination_applies_offset_and_limit() {
        let mut log = ActivityLog::new(10);
        let tenant = TenantId::new();
        let base = Utc::now();

        for second in 0..5 {
            log.record(entry(tenant, TaskStatus::Pending, base + chrono::Duration::seconds(second)));
        }

        let page = log.for_tenant(tenant, Page::new(2, 1));
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].at, base + chrono::Duration::seconds(3));
        assert_eq!(page[1].at, base + chrono::Duration::seconds(2));
    }

    #[test]
    fn tenants_are_isolated() {
        let mut log = ActivityLog::new(10);
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        log.record(entry(tenant_a, TaskStatus::Pending, Utc::now()));

        assert_eq!(log.len_for_tenant(tenant_a), 1);
        assert_eq!(log.len_for_tenant(tenant_b), 0);
        assert!(log.for_tenant(tenant_b, Page::new(10, 0)).is_empty());
    }
}
