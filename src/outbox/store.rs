//! Outbox persistence.
//!
//! Events are never deleted. Only the delivery engine mutates them after
//! `enqueue`, and only while they are PENDING. Fetching claims: a fetched
//! event is pushed out to `claim_until` so a concurrent drain skips it until
//! the first one records the outcome.

use crate::error::Result;
use crate::outbox::event::{NewOutboxEvent, OutboxEvent, OutboxStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[async_trait]
pub trait OutboxStore: Send + Sync + std::fmt::Debug {
    /// Insert the event, or return the existing one with the same idempotency key
    async fn enqueue(&self, event: &NewOutboxEvent) -> Result<OutboxEvent>;

    /// Claim up to `limit` PENDING events with `next_attempt_at <= now`, oldest
    /// first, moving their `next_attempt_at` to `claim_until`
    async fn fetch_ready(
        &self,
        limit: u32,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>>;

    /// Returns whether a PENDING event was transitioned
    async fn mark_delivered(&self, id: i64, delivered_at: DateTime<Utc>) -> Result<bool>;

    /// Count one failed attempt. The event becomes FAILED once its stored
    /// attempt count reaches `max_retries`, otherwise it is due at `retry_at`.
    async fn record_failure(
        &self,
        id: i64,
        reason: &str,
        retry_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Option<OutboxEvent>>;

    /// Make a PENDING event due at `next_attempt_at` without counting an attempt
    async fn reschedule(&self, id: i64, next_attempt_at: DateTime<Utc>) -> Result<bool>;

    async fn count_pending(&self) -> Result<u64>;

    async fn get(&self, id: i64) -> Result<Option<OutboxEvent>>;
}

#[derive(Debug, Default)]
struct MemoryOutbox {
    next_id: i64,
    events: BTreeMap<i64, OutboxEvent>,
    by_key: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: Mutex<MemoryOutbox>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event in id order
    pub fn all(&self) -> Vec<OutboxEvent> {
        self.inner.lock().events.values().cloned().collect()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, event: &NewOutboxEvent) -> Result<OutboxEvent> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .by_key
            .get(&event.idempotency_key)
            .and_then(|id| inner.events.get(id))
        {
            return Ok(existing.clone());
        }

        inner.next_id += 1;
        let now = Utc::now();
        let stored = OutboxEvent {
            id: inner.next_id,
            topic: event.topic.clone(),
            payload: event.payload.clone(),
            idempotency_key: event.idempotency_key.clone(),
            attempts: 0,
            status: OutboxStatus::Pending,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
            delivered_at: None,
        };
        inner.by_key.insert(stored.idempotency_key.clone(), stored.id);
        inner.events.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn fetch_ready(
        &self,
        limit: u32,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>> {
        let mut inner = self.inner.lock();
        let mut ready: Vec<OutboxEvent> = inner
            .events
            .values()
            .filter(|event| event.is_ready_at(now))
            .cloned()
            .collect();
        ready.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        ready.truncate(limit as usize);

        for event in &mut ready {
            event.next_attempt_at = claim_until;
            if let Some(stored) = inner.events.get_mut(&event.id) {
                stored.next_attempt_at = claim_until;
            }
        }
        Ok(ready)
    }

    async fn mark_delivered(&self, id: i64, delivered_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.events.get_mut(&id) {
            Some(event) if event.status == OutboxStatus::Pending => {
                event.status = OutboxStatus::Delivered;
                event.delivered_at = Some(delivered_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: i64,
        reason: &str,
        retry_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Option<OutboxEvent>> {
        let mut inner = self.inner.lock();
        let Some(event) = inner.events.get_mut(&id) else {
            return Ok(None);
        };
        if event.status != OutboxStatus::Pending {
            return Ok(None);
        }

        event.attempts += 1;
        event.last_error = Some(reason.to_string());
        if event.attempts.max(0) as u32 >= max_retries {
            event.status = OutboxStatus::Failed;
        } else {
            event.next_attempt_at = retry_at;
        }
        Ok(Some(event.clone()))
    }

    async fn reschedule(&self, id: i64, next_attempt_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.events.get_mut(&id) {
            Some(event) if event.status == OutboxStatus::Pending => {
                event.next_attempt_at = next_attempt_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_pending(&self) -> Result<u64> {
        let inner = self.inner.lock();
        Ok(inner
            .events
            .values()
            .filter(|event| event.status == OutboxStatus::Pending)
            .count() as u64)
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxEvent>> {
        Ok(self.inner.lock().events.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn new_event(key: &str) -> NewOutboxEvent {
        NewOutboxEvent::new("invite.sent", json!({"key": key}), key)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_on_key() {
        let store = InMemoryOutboxStore::new();
        let first = store.enqueue(&new_event("k1")).await.unwrap();
        let again = store
            .enqueue(&NewOutboxEvent::new("other.topic", json!({}), "k1"))
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_ready_respects_schedule_order_and_limit() {
        let store = InMemoryOutboxStore::new();
        let a = store.enqueue(&new_event("a")).await.unwrap();
        let b = store.enqueue(&new_event("b")).await.unwrap();
        let c = store.enqueue(&new_event("c")).await.unwrap();
        let now = Utc::now();

        store
            .record_failure(a.id, "HTTP 503", now + Duration::minutes(5), 8)
            .await
            .unwrap();

        let ready = store.fetch_ready(10, now, now).await.unwrap();
        let ids: Vec<i64> = ready.iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);

        assert_eq!(store.fetch_ready(1, now, now).await.unwrap()[0].id, b.id);
        assert_eq!(
            store
                .fetch_ready(10, now + Duration::minutes(6), now + Duration::minutes(6))
                .await
                .unwrap()[0]
                .id,
            a.id
        );
    }

    #[tokio::test]
    async fn test_fetch_claims_until_outcome_is_recorded() {
        let store = InMemoryOutboxStore::new();
        let event = store.enqueue(&new_event("k")).await.unwrap();
        let now = Utc::now();
        let claim_until = now + Duration::minutes(5);

        let claimed = store.fetch_ready(10, now, claim_until).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].next_attempt_at, claim_until);
        assert!(store.fetch_ready(10, now, claim_until).await.unwrap().is_empty());

        assert!(store.reschedule(event.id, now).await.unwrap());
        assert_eq!(store.fetch_ready(10, now, claim_until).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_decides_failure_from_its_own_count() {
        let store = InMemoryOutboxStore::new();
        let event = store.enqueue(&new_event("k")).await.unwrap();
        let now = Utc::now();

        // Two writers that both saw attempts = 0
        let first = store
            .record_failure(event.id, "HTTP 503", now, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, OutboxStatus::Pending);
        let second = store
            .record_failure(event.id, "HTTP 503", now, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(second.status, OutboxStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_events_are_frozen() {
        let store = InMemoryOutboxStore::new();
        let event = store.enqueue(&new_event("k")).await.unwrap();

        let failed = store
            .record_failure(event.id, "HTTP 500", Utc::now(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.attempts, 1);

        assert!(store
            .record_failure(event.id, "again", Utc::now(), 1)
            .await
            .unwrap()
            .is_none());
        assert!(!store.mark_delivered(event.id, Utc::now()).await.unwrap());
        assert!(!store.reschedule(event.id, Utc::now()).await.unwrap());
        assert_eq!(store.count_pending().await.unwrap(), 0);
        let now = Utc::now();
        assert!(store.fetch_ready(10, now, now).await.unwrap().is_empty());
    }
}
