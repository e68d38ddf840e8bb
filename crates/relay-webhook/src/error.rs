//! Error types for webhook delivery operations.
//!
//! Covers network failures, HTTP classification, configuration problems,
//! and signing. Errors carry enough context for retry decisions and
//! operator diagnostics.

use std::time::Duration;

use thiserror::Error;

use crate::config::EndpointId;

/// Result type alias for webhook operations.
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Error types for webhook delivery and configuration.
#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// Network-level connectivity failure.
    #[error("network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// Delivery attempt exceeded its timeout.
    #[error("delivery timed out after {timeout:?}")]
    Timeout {
        /// The exceeded timeout.
        timeout: Duration,
    },

    /// Endpoint configuration was invalid or missing.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Referenced endpoint does not exist.
    #[error("endpoint {id} not found")]
    EndpointNotFound {
        /// The missing endpoint ID.
        id: EndpointId,
    },

    /// Payload could not be serialized to canonical JSON.
    #[error("payload serialization failed: {message}")]
    Serialization {
        /// Serializer error description.
        message: String,
    },

    /// HMAC signing failed.
    #[error("signing failed: {message}")]
    Signing {
        /// Signer error description.
        message: String,
    },
}

impl WebhookError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a serialization error from a message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a signing error from a message.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing { message: message.into() }
    }

    /// Whether the failure is transient and worth another attempt.
    ///
    /// Configuration, serialization, and signing problems will not fix
    /// themselves on retry; transport failures might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(WebhookError::network("connection refused").is_retryable());
        assert!(WebhookError::timeout(Duration::from_secs(30)).is_retryable());

        assert!(!WebhookError::configuration("no url").is_retryable());
        assert!(!WebhookError::signing("empty secret").is_retryable());
        assert!(!WebhookError::serialization("bad value").is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let error = WebhookError::timeout(Duration::from_secs(30));
        assert_eq!(error.to_string(), "delivery timed out after 30s");
    }
}
