//! Postgres outbox over the `outbox_events` table.

use crate::error::{OutreachError, Result};
use crate::outbox::event::{NewOutboxEvent, OutboxEvent};
use crate::outbox::store::OutboxStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const EVENT_COLUMNS: &str = "id, topic, payload_json AS payload, idempotency_key, attempts, \
     status, next_attempt_at, created_at, last_error, delivered_at";

#[derive(Debug, sqlx::FromRow)]
struct OutboxEventRow {
    id: i64,
    topic: String,
    payload: serde_json::Value,
    idempotency_key: String,
    attempts: i32,
    status: String,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_error: Option<String>,
    delivered_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = OutreachError;

    fn try_from(row: OutboxEventRow) -> Result<Self> {
        Ok(OutboxEvent {
            id: row.id,
            topic: row.topic,
            payload: row.payload,
            idempotency_key: row.idempotency_key,
            attempts: row.attempts,
            status: row.status.parse()?,
            next_attempt_at: row.next_attempt_at,
            created_at: row.created_at,
            last_error: row.last_error,
            delivered_at: row.delivered_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE idempotency_key = $1");
        sqlx::query_as::<_, OutboxEventRow>(&sql)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxEvent::try_from)
            .transpose()
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(&self, event: &NewOutboxEvent) -> Result<OutboxEvent> {
        let sql = format!(
            r#"
            INSERT INTO outbox_events
                (topic, payload_json, idempotency_key, attempts, status, next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, $3, 0, 'PENDING', NOW(), NOW(), NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, OutboxEventRow>(&sql)
            .bind(&event.topic)
            .bind(&event.payload)
            .bind(&event.idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => row.try_into(),
            None => self.find_by_key(&event.idempotency_key).await?.ok_or_else(|| {
                OutreachError::DatabaseError(format!(
                    "outbox event {} vanished after idempotent insert",
                    event.idempotency_key
                ))
            }),
        }
    }

    async fn fetch_ready(
        &self,
        limit: u32,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>> {
        let sql = format!(
            r#"
            WITH ready AS (
                SELECT id AS ready_id
                FROM outbox_events
                WHERE status = 'PENDING' AND next_attempt_at <= $1
                ORDER BY created_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events
            SET next_attempt_at = $3, updated_at = NOW()
            FROM ready
            WHERE outbox_events.id = ready.ready_id
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let rows = sqlx::query_as::<_, OutboxEventRow>(&sql)
            .bind(now)
            .bind(i64::from(limit))
            .bind(claim_until)
            .fetch_all(&self.pool)
            .await?;
        let mut events = rows
            .into_iter()
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING carries no order
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn mark_delivered(&self, id: i64, delivered_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'DELIVERED', delivered_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(delivered_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: i64,
        reason: &str,
        retry_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Option<OutboxEvent>> {
        let sql = format!(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $4 THEN 'FAILED' ELSE 'PENDING' END,
                next_attempt_at = CASE WHEN attempts + 1 >= $4 THEN next_attempt_at ELSE $3 END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {EVENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, OutboxEventRow>(&sql)
            .bind(id)
            .bind(reason)
            .bind(retry_at)
            .bind(i64::from(max_retries))
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxEvent::try_from)
            .transpose()
    }

    async fn reschedule(&self, id: i64, next_attempt_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET next_attempt_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_pending(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE status = 'PENDING'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, id: i64) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE id = $1");
        sqlx::query_as::<_, OutboxEventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OutboxEvent::try_from)
            .transpose()
    }
}
