//! Persisted runtime flags: automation pause and quarantine.
//!
//! Flags are small JSON documents keyed by name. Both backends store them the
//! same way so operators can inspect `runtime_flags` directly.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

pub use crate::constants::flags::{
    AUTOMATION_PAUSE as AUTOMATION_PAUSE_FLAG, QUARANTINE as QUARANTINE_FLAG,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPause {
    /// `None` with `indefinite = true` means paused until an explicit resume
    pub paused_until: Option<DateTime<Utc>>,
    pub reason: String,
    pub indefinite: bool,
    pub set_at: DateTime<Utc>,
}

impl AutomationPause {
    /// A `paused_until` in the past is not a pause
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.indefinite || self.paused_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineFlag {
    pub active: bool,
    pub set_at: DateTime<Utc>,
}

#[async_trait]
pub trait RuntimeFlagStore: Send + Sync + std::fmt::Debug {
    async fn get_flag(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set_flag(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Whether a flag was removed
    async fn clear_flag(&self, key: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
    flags: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeFlagStore for InMemoryFlagStore {
    async fn get_flag(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.flags.lock().get(key).cloned())
    }

    async fn set_flag(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.flags.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn clear_flag(&self, key: &str) -> Result<bool> {
        Ok(self.flags.lock().remove(key).is_some())
    }
}

/// Flag store over `runtime_flags(flag_key PK, value_json, updated_at)`
#[derive(Debug, Clone)]
pub struct PgFlagStore {
    pool: PgPool,
}

impl PgFlagStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuntimeFlagStore for PgFlagStore {
    async fn get_flag(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value_json FROM runtime_flags WHERE flag_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_flag(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runtime_flags (flag_key, value_json, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (flag_key) DO UPDATE SET
                value_json = EXCLUDED.value_json,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_flag(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM runtime_flags WHERE flag_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
