//! End-to-end webhook delivery tests against mock HTTP endpoints.
//!
//! Wires the real dispatch engine, emitter, and executor together and
//! drives dispatch cycles manually with a test clock.

use std::{sync::Arc, time::Duration};

use relay_core::{TaskKind, TaskStatus, TenantId, TestClock};
use relay_engine::{
    DispatchEngine, EngineConfig, ExecutorRegistry, Page, RetryPolicy, TaskFilter,
};
use relay_webhook::{
    signer, EndpointOptions, EndpointStore, WebhookClient, WebhookEmitter, WebhookExecutor,
};
use tokio::sync::RwLock;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct TestRig {
    clock: Arc<TestClock>,
    engine: Arc<DispatchEngine>,
    emitter: WebhookEmitter,
}

fn rig() -> TestRig {
    let clock = Arc::new(TestClock::new());
    let client = WebhookClient::with_defaults().unwrap();

    let registry = ExecutorRegistry::builder()
        .register(TaskKind::WebhookRetry, Arc::new(WebhookExecutor::new(client.clone())))
        .build();

    let config = EngineConfig {
        default_retry_policy: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        },
        ..EngineConfig::default()
    };
    let engine = Arc::new(DispatchEngine::new(registry, config, clock.clone()));

    let endpoints = Arc::new(RwLock::new(EndpointStore::new()));
    let emitter = WebhookEmitter::new(endpoints, engine.clone(), client, clock.clone());

    TestRig { clock, engine, emitter }
}

#[tokio::test]
async fn delivery_carries_valid_signature_and_headers() {
    let rig = rig();
    let server = MockServer::start().await;
    let tenant = TenantId::new();

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    rig.emitter
        .configure(
            tenant,
            "payment.updated",
            format!("{}/hook", server.uri()),
            "endpoint-secret",
            EndpointOptions::default(),
        )
        .await
        .unwrap();

    let tasks = rig
        .emitter
        .emit(tenant, "payment.updated", serde_json::json!({"payment": "pay-1"}))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);

    rig.engine.run_cycle().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let signature =
        request.headers.get("X-Webhook-Signature").unwrap().to_str().unwrap().to_string();
    assert!(signer::verify(&request.body, &signature, "endpoint-secret"));

    assert_eq!(
        request.headers.get("X-Webhook-Event").unwrap().to_str().unwrap(),
        "payment.updated"
    );
    assert!(request.headers.get("X-Webhook-Event-Id").is_some());

    // The body is the canonical envelope.
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["event_type"], "payment.updated");
    assert_eq!(body["data"]["payment"], "pay-1");
    assert_eq!(body["source"], "relay");

    let done = rig.engine.get_task(tasks[0].id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn failing_endpoint_does_not_block_other_fanout_targets() {
    let rig = rig();
    let healthy = MockServer::start().await;
    let broken = MockServer::start().await;
    let tenant = TenantId::new();

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&healthy)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&broken)
        .await;

    rig.emitter
        .configure(
            tenant,
            "delivery.completed",
            format!("{}/hook", broken.uri()),
            "secret-a",
            EndpointOptions::default(),
        )
        .await
        .unwrap();
    rig.emitter
        .configure(
            tenant,
            "delivery.completed",
            format!("{}/hook", healthy.uri()),
            "secret-b",
            EndpointOptions::default(),
        )
        .await
        .unwrap();

    let tasks = rig
        .emitter
        .emit(tenant, "delivery.completed", serde_json::json!({"order": 7}))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);

    // Both tasks share the webhook queue: two cycles drain them.
    rig.engine.run_cycle().await;
    rig.engine.run_cycle().await;

    healthy.verify().await;

    let completed = rig
        .engine
        .list_tasks(
            TaskFilter::for_tenant(tenant).with_status(TaskStatus::Completed),
            Page::default(),
        )
        .await;
    assert_eq!(completed.len(), 1);

    let failed = rig
        .engine
        .list_tasks(
            TaskFilter::for_tenant(tenant).with_status(TaskStatus::Failed),
            Page::default(),
        )
        .await;
    assert_eq!(failed.len(), 1);
    assert!(failed[0].last_error.as_deref().unwrap().contains("HTTP 500"));

    // The broken endpoint retries independently.
    assert_eq!(rig.engine.retry_queue().await.len(), 1);
}

#[tokio::test]
async fn server_error_retries_until_endpoint_recovers() {
    let rig = rig();
    let server = MockServer::start().await;
    let tenant = TenantId::new();

    // First attempt gets a 500, every later attempt succeeds.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    rig.emitter
        .configure(
            tenant,
            "message.sent",
            format!("{}/hook", server.uri()),
            "secret",
            EndpointOptions::default(),
        )
        .await
        .unwrap();
    rig.emitter.emit(tenant, "message.sent", serde_json::json!({})).await.unwrap();

    // Attempt 0 fails.
    rig.engine.run_cycle().await;
    assert_eq!(rig.engine.retry_queue().await.len(), 1);

    // Attempt 1 succeeds after the backoff delay.
    rig.clock.advance(Duration::from_millis(100));
    rig.engine.run_cycle().await;

    let completed = rig
        .engine
        .list_tasks(
            TaskFilter::for_tenant(tenant).with_status(TaskStatus::Completed),
            Page::default(),
        )
        .await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].attempt, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    // Attempt numbers travel with the deliveries.
    assert_eq!(requests[0].headers.get("X-Webhook-Attempt").unwrap().to_str().unwrap(), "0");
    assert_eq!(requests[1].headers.get("X-Webhook-Attempt").unwrap().to_str().unwrap(), "1");
}

#[tokio::test]
async fn endpoint_max_attempts_bounds_webhook_retries() {
    let rig = rig();
    let server = MockServer::start().await;
    let tenant = TenantId::new();

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    rig.emitter
        .configure(
            tenant,
            "payment.updated",
            format!("{}/hook", server.uri()),
            "secret",
            EndpointOptions { max_attempts: 2, ..Default::default() },
        )
        .await
        .unwrap();
    rig.emitter.emit(tenant, "payment.updated", serde_json::json!({})).await.unwrap();

    for _ in 0..6 {
        rig.clock.advance(Duration::from_secs(60));
        rig.engine.run_cycle().await;
    }

    // Endpoint allows 2 attempts even though the kind policy allows 3.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(rig.engine.retry_queue().await.is_empty());
}

#[tokio::test]
async fn emit_without_configured_endpoint_drops_event() {
    let rig = rig();
    let tenant = TenantId::new();

    let tasks =
        rig.emitter.emit(tenant, "payment.updated", serde_json::json!({})).await.unwrap();

    assert!(tasks.is_empty());
    let total: usize = rig.engine.queue_depths().await.iter().map(|(_, d)| d).sum();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn disabled_endpoint_is_skipped_at_fanout() {
    let rig = rig();
    let server = MockServer::start().await;
    let tenant = TenantId::new();

    let endpoint = rig
        .emitter
        .configure(
            tenant,
            "payment.updated",
            format!("{}/hook", server.uri()),
            "secret",
            EndpointOptions::default(),
        )
        .await
        .unwrap();
    rig.emitter.disable(endpoint.id).await.unwrap();

    let tasks =
        rig.emitter.emit(tenant, "payment.updated", serde_json::json!({})).await.unwrap();
    assert!(tasks.is_empty());

    // Re-enabling brings it back.
    rig.emitter.enable(endpoint.id).await.unwrap();
    let tasks =
        rig.emitter.emit(tenant, "payment.updated", serde_json::json!({})).await.unwrap();
    assert_eq!(tasks.len(), 1);
}

#[tokio::test]
async fn send_test_reports_status_and_latency_without_tasks() {
    let rig = rig();
    let server = MockServer::start().await;
    let tenant = TenantId::new();

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = rig
        .emitter
        .configure(
            tenant,
            "payment.updated",
            format!("{}/hook", server.uri()),
            "secret",
            EndpointOptions::default(),
        )
        .await
        .unwrap();

    let report =
        rig.emitter.send_test(endpoint.id, serde_json::json!({"ping": true})).await.unwrap();

    assert!(report.success);
    assert_eq!(report.status_code, Some(200));
    assert!(report.error.is_none());

    // Diagnostics only: nothing was enqueued.
    let total: usize = rig.engine.queue_depths().await.iter().map(|(_, d)| d).sum();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn send_test_reports_transport_failure() {
    let rig = rig();
    let tenant = TenantId::new();

    let endpoint = rig
        .emitter
        .configure(
            tenant,
            "payment.updated",
            "http://127.0.0.1:9/hook",
            "secret",
            EndpointOptions { timeout: Duration::from_secs(2), ..Default::default() },
        )
        .await
        .unwrap();

    let report = rig.emitter.send_test(endpoint.id, serde_json::json!({})).await.unwrap();

    assert!(!report.success);
    assert_eq!(report.status_code, None);
    assert!(report.error.is_some());
}

#[tokio::test]
async fn fanout_shares_one_event_id_across_endpoints() {
    let rig = rig();
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    let tenant = TenantId::new();

    for server in [&server_a, &server_b] {
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    rig.emitter
        .configure(
            tenant,
            "delivery.completed",
            format!("{}/hook", server_a.uri()),
            "sa",
            EndpointOptions::default(),
        )
        .await
        .unwrap();
    rig.emitter
        .configure(
            tenant,
            "delivery.completed",
            format!("{}/hook", server_b.uri()),
            "sb",
            EndpointOptions::default(),
        )
        .await
        .unwrap();

    rig.emitter.emit(tenant, "delivery.completed", serde_json::json!({})).await.unwrap();
    rig.engine.run_cycle().await;
    rig.engine.run_cycle().await;

    let id_a = server_a.received_requests().await.unwrap()[0]
        .headers
        .get("X-Webhook-Event-Id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let id_b = server_b.received_requests().await.unwrap()[0]
        .headers
        .get("X-Webhook-Event-Id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // Receivers deduplicate fan-out deliveries by event ID.
    assert_eq!(id_a, id_b);
}
