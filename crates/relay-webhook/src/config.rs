//! Webhook endpoint configuration.
//!
//! Each tenant may register multiple endpoints per event type. An
//! endpoint bundles the destination URL, the signing secret, and the
//! delivery knobs (attempt bound, timeout, active flag) that are stamped
//! onto every materialized delivery task.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use relay_core::TenantId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WebhookError};

/// Strongly-typed endpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    /// Creates a new random endpoint ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One configured webhook destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Tenant that owns this endpoint.
    pub tenant_id: TenantId,

    /// Event type this endpoint subscribes to.
    pub event_type: String,

    /// Destination URL for deliveries.
    pub url: String,

    /// Secret used to sign payloads for this endpoint.
    pub secret: String,

    /// Delivery attempt bound, including the initial attempt.
    pub max_attempts: u32,

    /// Per-delivery HTTP timeout.
    pub timeout: Duration,

    /// Whether this endpoint currently receives deliveries.
    ///
    /// Inactive endpoints are skipped at fan-out. Soft-disable without
    /// losing the configuration.
    pub is_active: bool,

    /// When this endpoint was registered.
    pub created_at: DateTime<Utc>,

    /// When the configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Optional knobs for endpoint registration.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Delivery attempt bound.
    pub max_attempts: u32,
    /// Per-delivery HTTP timeout.
    pub timeout: Duration,
    /// Whether the endpoint starts active.
    pub is_active: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self { max_attempts: 5, timeout: Duration::from_secs(30), is_active: true }
    }
}

/// In-memory registry of webhook endpoints.
#[derive(Debug, Default)]
pub struct EndpointStore {
    endpoints: HashMap<EndpointId, WebhookEndpoint>,
}

impl EndpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint for a tenant and event type.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty or non-HTTP URL, an
    /// empty secret, or a zero attempt bound.
    pub fn configure(
        &mut self,
        tenant_id: TenantId,
        event_type: impl Into<String>,
        url: impl Into<String>,
        secret: impl Into<String>,
        options: EndpointOptions,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint> {
        let url = url.into();
        let secret = secret.into();
        let event_type = event_type.into();

        if event_type.is_empty() {
            return Err(WebhookError::configuration("event type must not be empty"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(WebhookError::configuration(format!(
                "endpoint url must be http(s), got '{url}'"
            )));
        }
        if secret.is_empty() {
            return Err(WebhookError::configuration("signing secret must not be empty"));
        }
        if options.max_attempts == 0 {
            return Err(WebhookError::configuration("max_attempts must be at least 1"));
        }

        let endpoint = WebhookEndpoint {
            id: EndpointId::new(),
            tenant_id,
            event_type,
            url,
            secret,
            max_attempts: options.max_attempts,
            timeout: options.timeout,
            is_active: options.is_active,
            created_at: now,
            updated_at: now,
        };
        self.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(endpoint)
    }

    /// Enables or disables an endpoint without deleting it.
    pub fn set_active(
        &mut self,
        id: EndpointId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<&WebhookEndpoint> {
        let endpoint =
            self.endpoints.get_mut(&id).ok_or(WebhookError::EndpointNotFound { id })?;
        endpoint.is_active = active;
        endpoint.updated_at = now;
        Ok(endpoint)
    }

    /// Removes an endpoint entirely.
    pub fn remove(&mut self, id: EndpointId) -> Result<WebhookEndpoint> {
        self.endpoints.remove(&id).ok_or(WebhookError::EndpointNotFound { id })
    }

    /// Looks up an endpoint.
    pub fn get(&self, id: EndpointId) -> Option<&WebhookEndpoint> {
        self.endpoints.get(&id)
    }

    /// Lists a tenant's endpoints, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<WebhookEndpoint> {
        let mut endpoints: Vec<_> = self
            .endpoints
            .values()
            .filter(|endpoint| endpoint.tenant_id == tenant_id)
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        endpoints
    }

    /// Active endpoints for a tenant and event type, oldest first.
    pub fn find_active(&self, tenant_id: TenantId, event_type: &str) -> Vec<WebhookEndpoint> {
        let mut endpoints: Vec<_> = self
            .endpoints
            .values()
            .filter(|endpoint| {
                endpoint.is_active
                    && endpoint.tenant_id == tenant_id
                    && endpoint.event_type == event_type
            })
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EndpointStore {
        EndpointStore::new()
    }

    #[test]
    fn configure_validates_inputs() {
        let mut store = store();
        let tenant = TenantId::new();
        let now = Utc::now();

        assert!(store
            .configure(tenant, "x", "ftp://nope", "secret", EndpointOptions::default(), now)
            .is_err());
        assert!(store
            .configure(tenant, "x", "https://ok.example", "", EndpointOptions::default(), now)
            .is_err());
        assert!(store
            .configure(tenant, "", "https://ok.example", "s", EndpointOptions::default(), now)
            .is_err());
        assert!(store
            .configure(
                tenant,
                "x",
                "https://ok.example",
                "s",
                EndpointOptions { max_attempts: 0, ..Default::default() },
                now
            )
            .is_err());

        let endpoint = store
            .configure(
                tenant,
                "payment.updated",
                "https://ok.example/hook",
                "secret",
                EndpointOptions::default(),
                now,
            )
            .unwrap();
        assert!(endpoint.is_active);
        assert_eq!(endpoint.max_attempts, 5);
    }

    #[test]
    fn find_active_skips_disabled_and_other_events() {
        let mut store = store();
        let tenant = TenantId::new();
        let now = Utc::now();

        let first = store
            .configure(
                tenant,
                "payment.updated",
                "https://a.example/hook",
                "s1",
                EndpointOptions::default(),
                now,
            )
            .unwrap();
        let second = store
            .configure(
                tenant,
                "payment.updated",
                "https://b.example/hook",
                "s2",
                EndpointOptions::default(),
                now + chrono::Duration::seconds(1),
            )
            .unwrap();
        store
            .configure(
                tenant,
                "message.sent",
                "https://c.example/hook",
                "s3",
                EndpointOptions::default(),
                now,
            )
            .unwrap();
        store.set_active(second.id, false, now).unwrap();

        let active = store.find_active(tenant, "payment.updated");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);
    }

    #[test]
    fn remove_and_missing_lookup() {
        let mut store = store();
        let tenant = TenantId::new();
        let now = Utc::now();

        let endpoint = store
            .configure(
                tenant,
                "payment.updated",
                "https://a.example/hook",
                "s",
                EndpointOptions::default(),
                now,
            )
            .unwrap();

        store.remove(endpoint.id).unwrap();
        assert!(store.get(endpoint.id).is_none());
        assert!(matches!(
            store.remove(endpoint.id),
            Err(WebhookError::EndpointNotFound { .. })
        ));
    }

    #[test]
    fn list_is_tenant_scoped() {
        let mut store = store();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let now = Utc::now();

        store
            .configure(tenant_a, "x", "https://a.example", "s", EndpointOptions::default(), now)
            .unwrap();
        store
            .configure(tenant_b, "x", "https://b.example", "s", EndpointOptions::default(), now)
            .unwrap();

        assert_eq!(store.list(tenant_a).len(), 1);
        assert_eq!(store.list(tenant_b).len(), 1);
    }
}
