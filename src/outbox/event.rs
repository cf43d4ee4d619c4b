//! Outbox event model.

use crate::error::OutreachError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    /// Terminal; retained for audit and manual replay
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Delivered => "DELIVERED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutreachError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(OutboxStatus::Pending),
            "DELIVERED" => Ok(OutboxStatus::Delivered),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(OutreachError::InvalidInput(format!(
                "unknown outbox status '{other}'"
            ))),
        }
    }
}

/// A persisted event awaiting (or done with) delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub topic: String,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub attempts: i32,
    pub status: OutboxStatus,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }
}

/// What the workflow layer hands to `enqueue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub topic: String,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
}

impl NewOutboxEvent {
    pub fn new(
        topic: impl Into<String>,
        payload: serde_json::Value,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// Body posted to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    pub event_id: i64,
    pub topic: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    /// 1-based attempt this body is sent on
    pub attempt: i32,
    pub payload: serde_json::Value,
}

impl DeliveryEnvelope {
    pub fn for_event(event: &OutboxEvent) -> Self {
        Self {
            event_id: event.id,
            topic: event.topic.clone(),
            idempotency_key: event.idempotency_key.clone(),
            created_at: event.created_at,
            attempt: event.attempts + 1,
            payload: event.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_text_form() {
        for status in [OutboxStatus::Pending, OutboxStatus::Delivered, OutboxStatus::Failed] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("pending".parse::<OutboxStatus>().is_err());
        assert_eq!(
            serde_json::to_value(OutboxStatus::Delivered).unwrap(),
            json!("DELIVERED")
        );
    }

    #[test]
    fn test_envelope_carries_identity_and_next_attempt() {
        let now = Utc::now();
        let event = OutboxEvent {
            id: 7,
            topic: "invite.accepted".to_string(),
            payload: json!({"profile": "p-1"}),
            idempotency_key: "invite-accepted-p-1".to_string(),
            attempts: 2,
            status: OutboxStatus::Pending,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
            delivered_at: None,
        };
        let envelope = DeliveryEnvelope::for_event(&event);
        assert_eq!(envelope.attempt, 3);
        assert_eq!(envelope.idempotency_key, "invite-accepted-p-1");
        assert!(event.is_ready_at(now));
    }
}
