//! Canonical webhook event payload.
//!
//! Every delivery carries the same envelope regardless of event type. The
//! signature is computed over the exact serialized bytes, so the JSON is
//! rendered once at fan-out time and the rendered string travels with the
//! task payload unchanged.

use chrono::{DateTime, Utc};
use relay_core::TenantId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WebhookError};

/// Canonical event envelope delivered to configured endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Dotted event name, e.g. `payment.updated`.
    pub event_type: String,

    /// Unique ID of this event. Shared across the fan-out to every
    /// endpoint, so receivers can deduplicate deliveries.
    pub event_id: Uuid,

    /// Tenant the event belongs to.
    pub tenant_id: TenantId,

    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,

    /// Event-specific data, passed through untouched.
    pub data: serde_json::Value,

    /// Emitting system identifier.
    pub source: String,
}

impl WebhookEvent {
    /// Creates an event envelope.
    pub fn new(
        tenant_id: TenantId,
        event_type: impl Into<String>,
        data: serde_json::Value,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: Uuid::new_v4(),
            tenant_id,
            timestamp,
            data,
            source: source.into(),
        }
    }

    /// Renders the canonical JSON these deliveries are signed over.
    pub fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| WebhookError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_field_order_is_stable() {
        let event = WebhookEvent::new(
            TenantId::new(),
            "delivery.completed",
            serde_json::json!({"order": 42}),
            "relay",
            Utc::now(),
        );

        let json = event.canonical_json().unwrap();
        let event_type_pos = json.find("event_type").unwrap();
        let event_id_pos = json.find("event_id").unwrap();
        let data_pos = json.find("\"data\"").unwrap();
        let source_pos = json.find("\"source\"").unwrap();

        assert!(event_type_pos < event_id_pos);
        assert!(event_id_pos < data_pos);
        assert!(data_pos < source_pos);
    }

    #[test]
    fn canonical_json_round_trips() {
        let event = WebhookEvent::new(
            TenantId::new(),
            "message.sent",
            serde_json::json!({"to": "+5691234"}),
            "relay",
            Utc::now(),
        );

        let json = event.canonical_json().unwrap();
        let parsed: WebhookEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.event_type, event.event_type);
        assert_eq!(parsed.data, event.data);
    }
}
