//! Delivery sinks for outbox events.
//!
//! Sinks receive each event at least once; a repeated `x-idempotency-key`
//! must be treated as a no-op on the receiving side.

use crate::config::OutboxConfig;
use crate::error::OutreachError;
use crate::outbox::event::{DeliveryEnvelope, OutboxEvent};
use crate::resilience::{CallOptions, GuardedHttpClient, IntegrationError};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use std::fmt::Debug;

type HmacSha256 = Hmac<Sha256>;

pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";
pub const EVENT_TOPIC_HEADER: &str = "x-event-topic";
pub const SIGNATURE_HEADER: &str = "x-signature-sha256";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error("sink rejected the event with HTTP {status}")]
    Rejected { status: u16 },
    #[error("could not build delivery body: {0}")]
    Encoding(String),
}

impl DeliveryError {
    /// No network attempt was made; the event's attempt budget is untouched
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, DeliveryError::Integration(error) if error.is_circuit_open())
    }
}

impl From<DeliveryError> for OutreachError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Integration(error) => error.into(),
            DeliveryError::Rejected { status } => OutreachError::TransientIntegration {
                integration: "outbox_webhook".to_string(),
                reason: format!("HTTP {status}"),
            },
            DeliveryError::Encoding(reason) => OutreachError::SerializationError(reason),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync + Debug {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError>;
}

/// Hex HMAC-SHA256 of `body`
pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| DeliveryError::Encoding(format!("invalid signing key: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Posts a [`DeliveryEnvelope`] as JSON to a webhook through the guarded client
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: GuardedHttpClient,
    url: String,
    signing_secret: Option<String>,
    options: CallOptions,
}

impl WebhookSink {
    pub fn new(client: GuardedHttpClient, url: impl Into<String>, options: CallOptions) -> Self {
        Self {
            client,
            url: url.into(),
            signing_secret: None,
            options,
        }
    }

    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    /// `None` when no webhook URL is configured
    pub fn from_config(
        client: GuardedHttpClient,
        config: &OutboxConfig,
        max_attempts: u32,
    ) -> Option<Self> {
        let url = config.webhook_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        let options = CallOptions::new("outbox_webhook", config.circuit_key.clone())
            .with_timeout(config.delivery_timeout())
            .with_max_attempts(max_attempts);
        let sink = Self::new(client, url, options);
        Some(match config.signing_secret.as_deref() {
            Some(secret) if !secret.is_empty() => sink.with_signing_secret(secret),
            _ => sink,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&DeliveryEnvelope::for_event(event))
            .map_err(|e| DeliveryError::Encoding(e.to_string()))?;
        let signature = match &self.signing_secret {
            Some(secret) => Some(sign_payload(secret.as_bytes(), &body)?),
            None => None,
        };

        let response = self
            .client
            .send(&self.options, |client| {
                let request = client
                    .post(&self.url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(IDEMPOTENCY_KEY_HEADER, &event.idempotency_key)
                    .header(EVENT_TOPIC_HEADER, &event.topic)
                    .body(body.clone());
                match &signature {
                    Some(signature) => request.header(SIGNATURE_HEADER, signature),
                    None => request,
                }
            })
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: response.status().as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_reference_vector() {
        // RFC 4231 test case 2
        let signature = sign_payload(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_circuit_open_detection() {
        let open = DeliveryError::Integration(IntegrationError::CircuitOpen {
            integration: "outbox_webhook".to_string(),
            circuit_key: "outbox_webhook".to_string(),
        });
        assert!(open.is_circuit_open());
        assert!(!DeliveryError::Rejected { status: 400 }.is_circuit_open());
    }

    #[test]
    fn test_conversion_keeps_circuit_key() {
        let open = DeliveryError::Integration(IntegrationError::CircuitOpen {
            integration: "outbox_webhook".to_string(),
            circuit_key: "hooks".to_string(),
        });
        assert_eq!(
            OutreachError::from(open),
            OutreachError::CircuitOpen {
                circuit_key: "hooks".to_string()
            }
        );
        let rejected: OutreachError = DeliveryError::Rejected { status: 410 }.into();
        assert!(rejected.to_string().contains("HTTP 410"));
    }

    #[test]
    fn test_from_config_needs_webhook_url() {
        let client = GuardedHttpClient::new(
            reqwest::Client::new(),
            std::sync::Arc::new(crate::resilience::RetryPolicy::from_config(
                &crate::config::IntegrationConfig::default(),
            )),
        );
        assert!(WebhookSink::from_config(client.clone(), &OutboxConfig::default(), 3).is_none());

        let config = OutboxConfig {
            webhook_url: Some("http://127.0.0.1:9/hooks".to_string()),
            ..OutboxConfig::default()
        };
        let sink = WebhookSink::from_config(client, &config, 3).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/hooks");
    }
}
