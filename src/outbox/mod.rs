//! # Outbox
//!
//! Durable event outbox with at-least-once delivery.
//!
//! ```rust,no_run
//! use outreach_core::alerting::TracingAlertSink;
//! use outreach_core::config::OutboxConfig;
//! use outreach_core::outbox::{
//!     DeliverySettings, InMemoryOutboxStore, NewOutboxEvent, OutboxDeliveryEngine, OutboxStore,
//!     WebhookSink,
//! };
//! use outreach_core::resilience::{CallOptions, GuardedHttpClient};
//! use std::sync::Arc;
//!
//! # async fn example(client: GuardedHttpClient) -> outreach_core::Result<()> {
//! let store = Arc::new(InMemoryOutboxStore::new());
//! store
//!     .enqueue(&NewOutboxEvent::new(
//!         "invite.accepted",
//!         serde_json::json!({ "profile": "p-42" }),
//!         "invite-accepted-p-42",
//!     ))
//!     .await?;
//!
//! let sink = WebhookSink::new(
//!     client,
//!     "https://hooks.example.com/outreach",
//!     CallOptions::new("outbox_webhook", "outbox_webhook"),
//! );
//! let config = OutboxConfig::default();
//! let engine = OutboxDeliveryEngine::new(
//!     store,
//!     Arc::new(sink),
//!     Arc::new(TracingAlertSink),
//!     DeliverySettings::from(&config),
//! );
//! let report = engine.drain_once(config.batch_size).await?;
//! println!("sent {}", report.sent);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod event;
pub mod postgres;
pub mod sink;
pub mod store;

pub use engine::{DeliverySettings, DrainReport, OutboxDeliveryEngine};
pub use event::{DeliveryEnvelope, NewOutboxEvent, OutboxEvent, OutboxStatus};
pub use postgres::PgOutboxStore;
pub use sink::{
    sign_payload, DeliveryError, EventSink, WebhookSink, EVENT_TOPIC_HEADER,
    IDEMPOTENCY_KEY_HEADER, SIGNATURE_HEADER,
};
pub use store::{InMemoryOutboxStore, OutboxStore};
