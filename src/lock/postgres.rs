//! Postgres-backed lock store over the `runtime_locks` table.

use crate::error::Result;
use crate::lock::store::{AcquireOutcome, LockStore, RuntimeLock};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

const LOCK_COLUMNS: &str =
    "lock_key, owner_id, acquired_at, heartbeat_at, expires_at, metadata_json AS metadata";

#[derive(Debug, Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_acquire(
        &self,
        lock_key: &str,
        owner_id: &str,
        ttl: Duration,
        metadata: &serde_json::Value,
    ) -> Result<AcquireOutcome> {
        // One statement: insert, or take over only if the lease lapsed or is ours
        let sql = format!(
            r#"
            INSERT INTO runtime_locks
                (lock_key, owner_id, acquired_at, heartbeat_at, expires_at, metadata_json, updated_at)
            VALUES ($1, $2, NOW(), NOW(), NOW() + make_interval(secs => $3), $4, NOW())
            ON CONFLICT (lock_key) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                acquired_at = CASE
                    WHEN runtime_locks.owner_id = EXCLUDED.owner_id THEN runtime_locks.acquired_at
                    ELSE EXCLUDED.acquired_at
                END,
                heartbeat_at = EXCLUDED.heartbeat_at,
                expires_at = EXCLUDED.expires_at,
                metadata_json = EXCLUDED.metadata_json,
                updated_at = NOW()
            WHERE runtime_locks.expires_at <= NOW()
               OR runtime_locks.owner_id = EXCLUDED.owner_id
            RETURNING {LOCK_COLUMNS}
            "#
        );

        let acquired = sqlx::query_as::<_, RuntimeLock>(&sql)
            .bind(lock_key)
            .bind(owner_id)
            .bind(ttl.as_secs_f64())
            .bind(metadata)
            .fetch_optional(&self.pool)
            .await?;

        match acquired {
            Some(lock) => Ok(AcquireOutcome {
                acquired: true,
                current_holder: Some(lock),
            }),
            None => Ok(AcquireOutcome {
                acquired: false,
                current_holder: self.current(lock_key).await?,
            }),
        }
    }

    async fn heartbeat(&self, lock_key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runtime_locks
            SET heartbeat_at = NOW(),
                expires_at = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE lock_key = $1 AND owner_id = $2
            "#,
        )
        .bind(lock_key)
        .bind(owner_id)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, lock_key: &str, owner_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM runtime_locks WHERE lock_key = $1 AND owner_id = $2")
            .bind(lock_key)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn current(&self, lock_key: &str) -> Result<Option<RuntimeLock>> {
        let sql = format!("SELECT {LOCK_COLUMNS} FROM runtime_locks WHERE lock_key = $1");
        let lock = sqlx::query_as::<_, RuntimeLock>(&sql)
            .bind(lock_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lock)
    }
}
