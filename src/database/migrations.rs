//! # Database Migration System
//!
//! Incremental SQL migrations tracked in `outreach_schema_migrations`.
//!
//! Migrations are discovered from a directory using the naming convention
//! `YYYYMMDDHHMMSS_description.sql` and applied in version order. Concurrent
//! process starts are serialized with a session-level advisory lock held on one
//! dedicated connection:
//!
//! ```sql
//! SELECT pg_advisory_lock(7_390_112_845_120_661)
//! ```

use crate::error::{OutreachError, Result};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Advisory lock key for migration runs
const MIGRATION_LOCK_KEY: i64 = 7_390_112_845_120_661;

/// A single migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// `YYYYMMDDHHMMSS`
    pub version: String,
    pub name: String,
    pub path: PathBuf,
}

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply outstanding migrations from `./migrations`
    pub async fn run_all(pool: &PgPool) -> Result<Vec<Migration>> {
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::run_from_dir(pool, &project_root.join("migrations")).await
    }

    /// Apply outstanding migrations from `dir`; returns the ones applied
    pub async fn run_from_dir(pool: &PgPool, dir: &Path) -> Result<Vec<Migration>> {
        let migrations = Self::discover_migrations(dir)?;
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::apply_outstanding(&mut conn, &migrations).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn apply_outstanding(
        conn: &mut PoolConnection<Postgres>,
        migrations: &BTreeMap<String, Migration>,
    ) -> Result<Vec<Migration>> {
        Self::ensure_migration_table(conn).await?;
        let applied = Self::get_applied_migrations(conn).await?;
        let mut newly_applied = Vec::new();

        for migration in migrations.values() {
            if applied.contains(&migration.version) {
                continue;
            }
            info!(
                version = %migration.version,
                name = %migration.name,
                "🗄️ Applying migration"
            );
            let sql = fs::read_to_string(&migration.path).map_err(|e| {
                OutreachError::DatabaseError(format!(
                    "cannot read migration {}: {e}",
                    migration.path.display()
                ))
            })?;
            sqlx::raw_sql(&sql).execute(&mut **conn).await?;
            sqlx::query("INSERT INTO outreach_schema_migrations (version, name) VALUES ($1, $2)")
                .bind(&migration.version)
                .bind(&migration.name)
                .execute(&mut **conn)
                .await?;
            newly_applied.push(migration.clone());
        }

        Ok(newly_applied)
    }

    /// Every well-named `.sql` file in `dir`, keyed by version
    pub fn discover_migrations(dir: &Path) -> Result<BTreeMap<String, Migration>> {
        if !dir.exists() {
            return Ok(BTreeMap::new());
        }

        let io_error = |e: std::io::Error| {
            OutreachError::DatabaseError(format!("cannot list {}: {e}", dir.display()))
        };
        let mut migrations = BTreeMap::new();

        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, name)) = Self::parse_migration_filename(stem) {
                migrations.insert(
                    version.clone(),
                    Migration {
                        version,
                        name,
                        path,
                    },
                );
            }
        }

        Ok(migrations)
    }

    /// `YYYYMMDDHHMMSS_some_name` -> (`YYYYMMDDHHMMSS`, `some name`)
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }
        let (version, rest) = filename.split_at(14);
        if !version.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let name = rest.strip_prefix('_')?.replace('_', " ");
        Some((version.to_string(), name))
    }

    async fn ensure_migration_table(conn: &mut PoolConnection<Postgres>) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS outreach_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn get_applied_migrations(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<HashSet<String>> {
        let versions: Vec<String> =
            sqlx::query_scalar("SELECT version FROM outreach_schema_migrations")
                .fetch_all(&mut **conn)
                .await?;
        Ok(versions.into_iter().collect())
    }
}
