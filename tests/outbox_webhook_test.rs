//! Outbox delivery through the real webhook sink and guarded HTTP client.

mod common;

use common::{fast_client, StubServer};
use outreach_core::alerting::{AlertSeverity, RecordingAlertSink};
use outreach_core::config::OutboxConfig;
use outreach_core::outbox::{
    sign_payload, DeliverySettings, InMemoryOutboxStore, NewOutboxEvent, OutboxDeliveryEngine,
    OutboxStatus, OutboxStore, WebhookSink,
};
use outreach_core::resilience::{CircuitState, GuardedHttpClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "whsec_test";

fn webhook_config(url: String, max_retries: u32) -> OutboxConfig {
    OutboxConfig {
        webhook_url: Some(url),
        signing_secret: Some(SECRET.to_string()),
        max_retries,
        backoff_base_seconds: 30,
        backoff_max_seconds: 3600,
        delivery_timeout_ms: 2_000,
        ..OutboxConfig::default()
    }
}

struct Harness {
    engine: OutboxDeliveryEngine,
    store: Arc<InMemoryOutboxStore>,
    alerts: Arc<RecordingAlertSink>,
    client: GuardedHttpClient,
}

fn harness(config: &OutboxConfig, attempts_per_call: u32, failure_threshold: u32) -> Harness {
    let client = fast_client(failure_threshold);
    let sink = WebhookSink::from_config(client.clone(), config, attempts_per_call).unwrap();
    let store = Arc::new(InMemoryOutboxStore::new());
    let alerts = Arc::new(RecordingAlertSink::new());
    let engine = OutboxDeliveryEngine::new(
        store.clone(),
        Arc::new(sink),
        alerts.clone(),
        DeliverySettings::from(config),
    );
    Harness {
        engine,
        store,
        alerts,
        client,
    }
}

#[tokio::test]
async fn test_delivers_signed_envelope() -> anyhow::Result<()> {
    let server = StubServer::start(vec![200]).await;
    let config = webhook_config(server.url("/hooks/outreach"), 8);
    let h = harness(&config, 3, 5);

    let event = h
        .store
        .enqueue(&NewOutboxEvent::new(
            "invite.accepted",
            json!({"lead_id": 42, "campaign": "q3"}),
            "invite.accepted:42",
        ))
        .await?;

    let report = h.engine.drain_once(10).await?;
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/hooks/outreach");
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-idempotency-key"), Some("invite.accepted:42"));
    assert_eq!(request.header("x-event-topic"), Some("invite.accepted"));

    let expected = sign_payload(SECRET.as_bytes(), &request.body)?;
    assert_eq!(request.header("x-signature-sha256"), Some(expected.as_str()));

    let body = request.json();
    assert_eq!(body["event_id"], json!(event.id));
    assert_eq!(body["attempt"], json!(1));
    assert_eq!(body["payload"]["lead_id"], json!(42));

    let stored = h.store.get(event.id).await?.unwrap();
    assert_eq!(stored.status, OutboxStatus::Delivered);
    assert!(stored.delivered_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_transient_errors_are_retried_within_one_delivery() -> anyhow::Result<()> {
    let server = StubServer::start(vec![503, 429, 202]).await;
    let config = webhook_config(server.url("/hooks"), 8);
    let h = harness(&config, 3, 10);

    let event = h
        .store
        .enqueue(&NewOutboxEvent::new("lead.replied", json!({}), "lead.replied:1"))
        .await?;

    let report = h.engine.drain_once(10).await?;
    assert_eq!(report.sent, 1);
    assert_eq!(server.request_count(), 3);
    // The same idempotency key on every retry lets the receiver dedupe
    assert!(server
        .requests()
        .iter()
        .all(|r| r.header("x-idempotency-key") == Some("lead.replied:1")));
    assert_eq!(h.store.get(event.id).await?.unwrap().attempts, 0);
    Ok(())
}

#[tokio::test]
async fn test_rejection_schedules_retry_then_fails_permanently() -> anyhow::Result<()> {
    let server = StubServer::start(vec![422]).await;
    let config = webhook_config(server.url("/hooks"), 2);
    let h = harness(&config, 3, 10);

    let event = h
        .store
        .enqueue(&NewOutboxEvent::new("lead.bounced", json!({}), "lead.bounced:9"))
        .await?;

    let first = h.engine.drain_once(10).await?;
    assert_eq!(first.failed, 1);
    assert_eq!(first.permanent_failures, 0);
    // 4xx is not retried inside the call
    assert_eq!(server.request_count(), 1);

    let pending = h.store.get(event.id).await?.unwrap();
    assert_eq!(pending.status, OutboxStatus::Pending);
    assert_eq!(pending.attempts, 1);
    assert!(pending.next_attempt_at > pending.created_at + chrono::Duration::seconds(29));
    assert!(pending.last_error.as_deref().unwrap_or_default().contains("422"));

    // Not ready yet: nothing is sent
    let idle = h.engine.drain_once(10).await?;
    assert_eq!(idle.sent + idle.failed, 0);
    assert_eq!(server.request_count(), 1);

    // Make the event due now without counting an attempt
    assert!(h.store.reschedule(event.id, chrono::Utc::now()).await?);
    let last = h.engine.drain_once(10).await?;
    assert_eq!(last.permanent_failures, 1);

    assert_eq!(server.request_count(), 2);

    let failed = h.store.get(event.id).await?.unwrap();
    assert_eq!(failed.status, OutboxStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(h.alerts.count_with_severity(AlertSeverity::Error), 1);
    Ok(())
}

#[tokio::test]
async fn test_open_circuit_defers_without_spending_attempts() -> anyhow::Result<()> {
    let server = StubServer::start(vec![500]).await;
    let config = webhook_config(server.url("/hooks"), 8);
    // One attempt per call and a breaker that trips on the first failure
    let h = harness(&config, 1, 1);

    let first = h
        .store
        .enqueue(&NewOutboxEvent::new("t", json!({"n": 1}), "k1"))
        .await?;
    let second = h
        .store
        .enqueue(&NewOutboxEvent::new("t", json!({"n": 2}), "k2"))
        .await?;

    let report = h.engine.drain_once(10).await?;
    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(server.request_count(), 1);

    assert_eq!(h.store.get(first.id).await?.unwrap().attempts, 1);
    let untouched = h.store.get(second.id).await?.unwrap();
    assert_eq!(untouched.attempts, 0);
    assert_eq!(untouched.status, OutboxStatus::Pending);

    let breaker = h
        .client
        .policy()
        .breakers()
        .get_circuit_breaker(&config.circuit_key)
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);
    Ok(())
}

#[tokio::test]
async fn test_run_loop_drains_until_shutdown() -> anyhow::Result<()> {
    let server = StubServer::start(vec![200]).await;
    let mut config = webhook_config(server.url("/hooks"), 8);
    config.drain_interval_seconds = 1;
    let h = Arc::new(harness(&config, 3, 5));

    for n in 0..3 {
        h.store
            .enqueue(&NewOutboxEvent::new("t", json!({ "n": n }), format!("k{n}")))
            .await?;
    }

    let (tx, rx) = tokio::sync::watch::channel(false);
    let runner = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.engine.run(rx).await })
    };

    // The first tick fires immediately
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.store.count_pending().await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    tx.send(true)?;
    runner.await??;
    assert_eq!(server.request_count(), 3);
    Ok(())
}
