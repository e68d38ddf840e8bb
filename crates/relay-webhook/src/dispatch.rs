//! Webhook fan-out and the delivery executor.
//!
//! [`WebhookEmitter`] turns a domain event into one `webhook_retry` task
//! per active endpoint, so each destination URL retries independently: a
//! failing endpoint never blocks delivery to the others. The
//! [`WebhookExecutor`] is the engine-side counterpart that performs the
//! signed POST when the dispatcher runs such a task.

use std::{sync::Arc, time::Duration};

use relay_core::{Clock, Task, TaskKind, TaskPriority, TenantId};
use relay_engine::{DispatchEngine, ExecutionError, Executor};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    client::{SignedDelivery, WebhookClient},
    config::{EndpointId, EndpointOptions, EndpointStore, WebhookEndpoint},
    error::{Result, WebhookError},
    event::WebhookEvent,
    signer,
};

/// Payload key holding the destination URL.
pub const PAYLOAD_URL: &str = "url";
/// Payload key holding the signing secret.
pub const PAYLOAD_SECRET: &str = "secret";
/// Payload key holding the event type.
pub const PAYLOAD_EVENT_TYPE: &str = "event_type";
/// Payload key holding the event ID.
pub const PAYLOAD_EVENT_ID: &str = "event_id";
/// Payload key holding the canonical JSON body.
pub const PAYLOAD_BODY: &str = "body";
/// Payload key holding the per-delivery timeout in seconds.
pub const PAYLOAD_TIMEOUT_SECS: &str = "timeout_secs";
/// Payload key holding the originating endpoint ID.
pub const PAYLOAD_ENDPOINT_ID: &str = "endpoint_id";

/// Report from a synchronous test delivery.
#[derive(Debug, Clone)]
pub struct TestDeliveryReport {
    /// HTTP status, when the endpoint responded at all.
    pub status_code: Option<u16>,
    /// Round-trip latency of the attempt.
    pub latency: Duration,
    /// Whether the attempt got a 2xx response.
    pub success: bool,
    /// Transport error description, when the endpoint never responded.
    pub error: Option<String>,
}

/// Emits domain events to configured webhook endpoints.
pub struct WebhookEmitter {
    endpoints: Arc<RwLock<EndpointStore>>,
    engine: Arc<DispatchEngine>,
    client: WebhookClient,
    clock: Arc<dyn Clock>,
    source: String,
}

impl WebhookEmitter {
    /// Creates an emitter over the shared endpoint registry and engine.
    pub fn new(
        endpoints: Arc<RwLock<EndpointStore>>,
        engine: Arc<DispatchEngine>,
        client: WebhookClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { endpoints, engine, client, clock, source: "relay".to_string() }
    }

    /// Overrides the `source` field stamped onto emitted events.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    // ── Configuration API ───────────────────────────────────────────────

    /// Registers a webhook endpoint.
    pub async fn configure(
        &self,
        tenant_id: TenantId,
        event_type: impl Into<String>,
        url: impl Into<String>,
        secret: impl Into<String>,
        options: EndpointOptions,
    ) -> Result<WebhookEndpoint> {
        let now = self.clock.now_utc();
        let endpoint = self
            .endpoints
            .write()
            .await
            .configure(tenant_id, event_type, url, secret, options, now)?;
        info!(
            endpoint_id = %endpoint.id,
            tenant_id = %tenant_id,
            event_type = %endpoint.event_type,
            "webhook endpoint configured"
        );
        Ok(endpoint)
    }

    /// Re-enables a disabled endpoint.
    pub async fn enable(&self, id: EndpointId) -> Result<WebhookEndpoint> {
        let now = self.clock.now_utc();
        Ok(self.endpoints.write().await.set_active(id, true, now)?.clone())
    }

    /// Disables an endpoint without deleting it.
    pub async fn disable(&self, id: EndpointId) -> Result<WebhookEndpoint> {
        let now = self.clock.now_utc();
        Ok(self.endpoints.write().await.set_active(id, false, now)?.clone())
    }

    /// Removes an endpoint.
    pub async fn remove(&self, id: EndpointId) -> Result<WebhookEndpoint> {
        self.endpoints.write().await.remove(id)
    }

    /// Lists a tenant's endpoints.
    pub async fn list(&self, tenant_id: TenantId) -> Vec<WebhookEndpoint> {
        self.endpoints.read().await.list(tenant_id)
    }

    // ── Emission ────────────────────────────────────────────────────────

    /// Fans an event out to every active endpoint for its type.
    ///
    /// Returns the materialized delivery tasks. With no active endpoint
    /// configured, the event is dropped with a warning: there is no
    /// target to retry against.
    pub async fn emit(
        &self,
        tenant_id: TenantId,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<Vec<Task>> {
        let targets = self.endpoints.read().await.find_active(tenant_id, event_type);
        if targets.is_empty() {
            warn!(
                tenant_id = %tenant_id,
                event_type = %event_type,
                "no active webhook endpoint configured, event dropped"
            );
            return Ok(Vec::new());
        }

        let now = self.clock.now_utc();
        let event = WebhookEvent::new(tenant_id, event_type, data, self.source.clone(), now);
        let body = event.canonical_json()?;

        let mut tasks = Vec::with_capacity(targets.len());
        for endpoint in targets {
            let task = build_delivery_task(&event, &body, &endpoint, now);
            match self.engine.submit_task(task).await {
                Ok(task) => {
                    debug!(
                        event_id = %event.event_id,
                        endpoint_id = %endpoint.id,
                        task_id = %task.id,
                        "webhook delivery task materialized"
                    );
                    tasks.push(task);
                },
                Err(error) => {
                    // One endpoint's rejection must not block the rest of
                    // the fan-out.
                    warn!(
                        event_id = %event.event_id,
                        endpoint_id = %endpoint.id,
                        error = %error,
                        "webhook delivery task rejected"
                    );
                },
            }
        }

        Ok(tasks)
    }

    /// Performs a single synchronous delivery attempt for diagnostics.
    ///
    /// No retry, no task: just latency and status for configuration-time
    /// verification of a newly registered endpoint.
    pub async fn send_test(
        &self,
        id: EndpointId,
        data: serde_json::Value,
    ) -> Result<TestDeliveryReport> {
        let endpoint = self
            .endpoints
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(WebhookError::EndpointNotFound { id })?;

        let now = self.clock.now_utc();
        let event = WebhookEvent::new(
            endpoint.tenant_id,
            endpoint.event_type.clone(),
            data,
            self.source.clone(),
            now,
        );
        let body = event.canonical_json()?;
        let signature = signer::sign(body.as_bytes(), &endpoint.secret)
            .map_err(|e| WebhookError::signing(e.to_string()))?;

        let delivery = SignedDelivery {
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            url: endpoint.url.clone(),
            body,
            signature,
            attempt: 0,
        };

        let started = std::time::Instant::now();
        match self.client.deliver(&delivery, Some(endpoint.timeout)).await {
            Ok(outcome) => Ok(TestDeliveryReport {
                status_code: Some(outcome.status_code),
                latency: outcome.duration,
                success: outcome.is_success,
                error: None,
            }),
            Err(error) => Ok(TestDeliveryReport {
                status_code: None,
                latency: started.elapsed(),
                success: false,
                error: Some(error.to_string()),
            }),
        }
    }
}

/// Builds the delivery task for one endpoint of a fan-out.
///
/// The endpoint's attempt bound and timeout are stamped onto the task, so
/// per-endpoint retry limits hold even though the backoff curve comes
/// from the shared `webhook_retry` kind policy.
fn build_delivery_task(
    event: &WebhookEvent,
    body: &str,
    endpoint: &WebhookEndpoint,
    now: chrono::DateTime<chrono::Utc>,
) -> Task {
    let mut payload = relay_core::Payload::new();
    payload.insert(PAYLOAD_URL.into(), serde_json::Value::String(endpoint.url.clone()));
    payload.insert(PAYLOAD_SECRET.into(), serde_json::Value::String(endpoint.secret.clone()));
    payload.insert(
        PAYLOAD_EVENT_TYPE.into(),
        serde_json::Value::String(event.event_type.clone()),
    );
    payload.insert(
        PAYLOAD_EVENT_ID.into(),
        serde_json::Value::String(event.event_id.to_string()),
    );
    payload.insert(PAYLOAD_BODY.into(), serde_json::Value::String(body.to_string()));
    payload.insert(
        PAYLOAD_TIMEOUT_SECS.into(),
        serde_json::Value::Number(endpoint.timeout.as_secs().into()),
    );
    payload.insert(
        PAYLOAD_ENDPOINT_ID.into(),
        serde_json::Value::String(endpoint.id.to_string()),
    );

    Task::new(
        TaskKind::WebhookRetry,
        event.tenant_id,
        payload,
        TaskPriority::Normal,
        endpoint.max_attempts,
        now,
    )
}

/// Engine executor performing signed webhook POSTs.
///
/// Registered for [`TaskKind::WebhookRetry`]. Idempotent from the
/// receiver's point of view: every delivery of the same event carries the
/// same `event_id` header, so consumers can collapse duplicates under the
/// at-least-once contract.
#[derive(Debug, Clone)]
pub struct WebhookExecutor {
    client: WebhookClient,
}

impl WebhookExecutor {
    /// Creates an executor over a delivery client.
    pub fn new(client: WebhookClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Executor for WebhookExecutor {
    async fn execute(&self, task: &Task) -> std::result::Result<serde_json::Value, ExecutionError> {
        let url = payload_str(task, PAYLOAD_URL)?;
        let secret = payload_str(task, PAYLOAD_SECRET)?;
        let event_type = payload_str(task, PAYLOAD_EVENT_TYPE)?;
        let event_id = payload_str(task, PAYLOAD_EVENT_ID)?
            .parse()
            .map_err(|e| ExecutionError::new(format!("invalid event_id in payload: {e}")))?;
        let body = payload_str(task, PAYLOAD_BODY)?;
        let timeout = task
            .payload
            .get(PAYLOAD_TIMEOUT_SECS)
            .and_then(serde_json::Value::as_u64)
            .map(Duration::from_secs);

        let signature = signer::sign(body.as_bytes(), secret)
            .map_err(|e| ExecutionError::new(format!("signing failed: {e}")))?;

        let delivery = SignedDelivery {
            event_id,
            event_type: event_type.to_string(),
            url: url.to_string(),
            body: body.to_string(),
            signature,
            attempt: task.attempt,
        };

        let outcome = self
            .client
            .deliver(&delivery, timeout)
            .await
            .map_err(|e| ExecutionError::new(e.to_string()))?;

        if !outcome.is_success {
            return Err(ExecutionError::new(format!(
                "endpoint returned HTTP {}",
                outcome.status_code
            )));
        }

        Ok(serde_json::json!({
            "status_code": outcome.status_code,
            "duration_ms": outcome.duration.as_millis() as u64,
        }))
    }
}

fn payload_str<'a>(task: &'a Task, key: &str) -> std::result::Result<&'a str, ExecutionError> {
    task.payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ExecutionError::new(format!("payload missing field '{key}'")))
}
