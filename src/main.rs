//! Relay task dispatch and webhook delivery service.
//!
//! Main entry point. Initializes tracing, wires the dispatch engine and
//! the webhook pipeline together, and coordinates graceful startup and
//! shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use relay_core::{SystemClock, TaskKind, TaskPriority};
use relay_engine::{DispatchEngine, EngineConfig, ExecutorRegistry, RetryPolicy};
use relay_webhook::{EndpointStore, WebhookClient, WebhookEmitter, WebhookExecutor};
use tokio::sync::RwLock;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting relay dispatch service");

    let config = Config::from_env()?;
    info!(
        tick_ms = config.tick_interval.as_millis(),
        execute_timeout_s = config.execute_timeout.as_secs(),
        max_retries = config.retry_policy.max_retries,
        "configuration loaded"
    );

    let clock = Arc::new(SystemClock::new());

    let webhook_client =
        WebhookClient::with_defaults().context("failed to build webhook client")?;
    let registry = ExecutorRegistry::builder()
        .register(TaskKind::WebhookRetry, Arc::new(WebhookExecutor::new(webhook_client.clone())))
        .build();

    let engine = Arc::new(DispatchEngine::new(
        registry,
        config.engine_config(),
        clock.clone(),
    ));

    // The emitter is the surface integration code uses to configure
    // endpoints and emit events; vendor adapters register their own
    // executors when embedding the engine.
    let endpoints = Arc::new(RwLock::new(EndpointStore::new()));
    let _emitter =
        WebhookEmitter::new(endpoints, engine.clone(), webhook_client, clock.clone());

    engine.start().await;
    info!("relay is ready");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    engine.shutdown().await.context("engine shutdown failed")?;
    info!("relay shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,relay=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}

/// Service configuration loaded from environment variables.
struct Config {
    tick_interval: Duration,
    execute_timeout: Duration,
    retry_policy: RetryPolicy,
    shutdown_timeout: Duration,
}

impl Config {
    fn from_env() -> Result<Self> {
        let tick_interval =
            Duration::from_millis(env_parse("RELAY_TICK_INTERVAL_MS", 5_000)?);
        let execute_timeout =
            Duration::from_secs(env_parse("RELAY_EXECUTE_TIMEOUT_SECS", 30)?);
        let shutdown_timeout =
            Duration::from_secs(env_parse("RELAY_SHUTDOWN_TIMEOUT_SECS", 30)?);

        let retry_policy = RetryPolicy {
            max_retries: env_parse("RELAY_MAX_RETRY_ATTEMPTS", 3)?,
            initial_delay: Duration::from_millis(env_parse("RELAY_RETRY_INITIAL_DELAY_MS", 5_000)?),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(env_parse("RELAY_RETRY_MAX_DELAY_MS", 300_000)?),
            jitter_factor: 0.1,
        };

        Ok(Self { tick_interval, execute_timeout, retry_policy, shutdown_timeout })
    }

    fn engine_config(&self) -> EngineConfig {
        let mut retry_policies = std::collections::HashMap::new();
        // Webhook endpoints are external and slow to recover; give them a
        // gentler curve than internal sync jobs.
        retry_policies.insert(
            TaskKind::WebhookRetry,
            RetryPolicy {
                max_retries: 5,
                initial_delay: Duration::from_secs(10),
                ..self.retry_policy.clone()
            },
        );

        EngineConfig {
            tick_interval: self.tick_interval,
            execute_timeout: self.execute_timeout,
            retry_priority: TaskPriority::High,
            retry_policies,
            default_retry_policy: self.retry_policy.clone(),
            shutdown_timeout: self.shutdown_timeout,
            ..EngineConfig::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: '{value}'")),
        Err(_) => Ok(default),
    }
}
