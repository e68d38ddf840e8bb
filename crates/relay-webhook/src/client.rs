//! HTTP client for webhook delivery.
//!
//! Handles request construction, per-delivery timeouts, and outcome
//! classification. Transport failures surface as errors; HTTP responses
//! of any status come back as outcomes for the caller to classify (any
//! 2xx counts as success).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, WebhookError};

/// Header carrying the hex HMAC-SHA256 payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// Header carrying the unique event ID.
pub const EVENT_ID_HEADER: &str = "X-Webhook-Event-Id";

/// Header carrying the delivery attempt number.
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default timeout for delivery requests.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Relay-Webhook/1.0".to_string(),
            max_redirects: 3,
        }
    }
}

/// A fully prepared, signed delivery request.
#[derive(Debug, Clone)]
pub struct SignedDelivery {
    /// Event being delivered.
    pub event_id: Uuid,
    /// Event type for the `X-Webhook-Event` header.
    pub event_type: String,
    /// Destination URL.
    pub url: String,
    /// Canonical JSON body. The signature covers these exact bytes.
    pub body: String,
    /// Hex HMAC-SHA256 signature of the body.
    pub signature: String,
    /// Delivery attempt number (0-based, matches the task's attempt).
    pub attempt: u32,
}

/// Result of one delivery attempt that reached the endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// HTTP status code returned.
    pub status_code: u16,
    /// Whether the status was 2xx.
    pub is_success: bool,
    /// Round-trip duration of the request.
    pub duration: Duration,
    /// Response body, truncated for diagnostics.
    pub body_snippet: String,
}

/// HTTP client optimized for webhook delivery.
///
/// Uses connection pooling and configurable timeouts so one slow tenant
/// endpoint does not hold connections hostage for the rest.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl WebhookClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the underlying HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                WebhookError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Performs one signed POST to the destination.
    ///
    /// `timeout` overrides the client default for this delivery; webhook
    /// endpoints carry their own configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Timeout`] when the request exceeds the
    /// timeout and [`WebhookError::Network`] for transport failures. HTTP
    /// error statuses are NOT errors; they come back in the outcome.
    pub async fn deliver(
        &self,
        delivery: &SignedDelivery,
        timeout: Option<Duration>,
    ) -> Result<DeliveryOutcome> {
        let effective_timeout = timeout.unwrap_or(self.config.timeout);
        let started = std::time::Instant::now();

        debug!(
            event_id = %delivery.event_id,
            url = %delivery.url,
            attempt = delivery.attempt,
            "delivering webhook"
        );

        let response = self
            .client
            .post(&delivery.url)
            .timeout(effective_timeout)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, &delivery.signature)
            .header(EVENT_HEADER, &delivery.event_type)
            .header(EVENT_ID_HEADER, delivery.event_id.to_string())
            .header(ATTEMPT_HEADER, delivery.attempt.to_string())
            .body(delivery.body.clone())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let duration = started.elapsed();
                warn!(
                    event_id = %delivery.event_id,
                    duration_ms = duration.as_millis(),
                    "webhook request failed: {error}"
                );
                if error.is_timeout() {
                    return Err(WebhookError::timeout(effective_timeout));
                }
                if error.is_connect() {
                    return Err(WebhookError::network(format!("connection failed: {error}")));
                }
                return Err(WebhookError::network(error.to_string()));
            },
        };

        let duration = started.elapsed();
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let body_snippet = read_body_snippet(response).await;

        debug!(
            event_id = %delivery.event_id,
            status = status_code,
            duration_ms = duration.as_millis(),
            "webhook response received"
        );

        Ok(DeliveryOutcome { status_code, is_success, duration, body_snippet })
    }
}

/// Reads the response body, truncated to a diagnostic-sized snippet.
async fn read_body_snippet(response: reqwest::Response) -> String {
    const MAX_SNIPPET: usize = 1024;

    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_SNIPPET {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_SNIPPET]);
                format!("{truncated}... (truncated)")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(error) => format!("[failed to read response body: {error}]"),
    }
}
