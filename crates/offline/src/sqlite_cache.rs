//! SQLite-backed backup cache.
//!
//! Entries live in a single `backup_cache` table. Expired rows read as absent
//! and are deleted on the read that notices them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::cache::{BackupCache, expiry_from, is_expired};
use crate::error::CacheError;

/// SQLite backup cache.
///
/// This struct is cheap to clone and is safe to share across threads.
#[derive(Debug, Clone)]
pub struct SqliteBackupCache {
    pool: SqlitePool,
}

impl SqliteBackupCache {
    /// Open (creating if needed) the cache database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("failed to create SQLite pool for backup cache at {:?}", path))?;

        Self::with_pool(pool).await
    }

    /// Open a private in-memory database (tests, ephemeral hosts).
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        // Every connection to :memory: is its own database; pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory SQLite backup cache")?;

        Self::with_pool(pool).await
    }

    /// Open the cache in the platform data directory:
    /// `{app_data_dir}/idwallet/queue_cache.db`.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = default_db_path()
            .context("failed to determine backup cache DB path - ensure app data directory is accessible")?;
        Self::open(path).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backup_cache (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                cached_at  TEXT NOT NULL,
                expires_at TEXT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create backup_cache table")?;

        Ok(Self { pool })
    }

    /// Delete every expired row. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            DELETE FROM backup_cache
            WHERE expires_at IS NOT NULL
              AND expires_at <= ?1
            "#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("failed to purge expired cache rows")?;

        Ok(result.rows_affected())
    }

    async fn upsert(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let payload = serde_json::to_string(value).context("failed to serialize cache value")?;
        let now = timestamp(Utc::now());
        let expires_at = expiry_from(ttl).map(timestamp);

        sqlx::query(
            r#"
            INSERT INTO backup_cache (key, value, cached_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key)
            DO UPDATE SET
                value = excluded.value,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(&payload)
        .bind(&now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert backup cache entry")?;

        Ok(())
    }

    async fn fetch(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let row = sqlx::query(
            r#"
            SELECT value, expires_at
            FROM backup_cache
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch backup cache entry")?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let expires_at: Option<String> = row.try_get("expires_at")?;
        let expires_at = expires_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .context("invalid expires_at in backup_cache")
            })
            .transpose()?;

        if is_expired(expires_at) {
            self.delete(key).await?;
            return Ok(None);
        }

        let data: String = row.try_get("value")?;
        let value = serde_json::from_str(&data).context("invalid JSON value in backup_cache")?;
        Ok(Some(value))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM backup_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("failed to delete backup cache entry")?;
        Ok(())
    }
}

#[async_trait]
impl BackupCache for SqliteBackupCache {
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.upsert(key, &value, ttl).await.map_err(storage)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.fetch(key).await.map_err(storage)
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.delete(key).await.map_err(storage)
    }
}

fn storage(err: anyhow::Error) -> CacheError {
    CacheError::Storage(format!("{err:#}"))
}

/// Fixed-width UTC timestamps so SQL string comparison matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Resolve the path to the SQLite cache database:
/// `{app_data_dir}/idwallet/queue_cache.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|mut h| {
            h.push(".local");
            h.push("share");
            h
        }))
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("idwallet");
    path.push("queue_cache.db");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_json_values() {
        let cache = SqliteBackupCache::open_in_memory().await.unwrap();
        let value = json!({"id": "abc", "nested": {"n": 1}});

        cache.set("queue_abc", value.clone(), Some(Duration::from_secs(60))).await.unwrap();

        assert_eq!(cache.get("queue_abc").await.unwrap(), Some(value));
        assert_eq!(cache.get("queue_missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_existing_key() {
        let cache = SqliteBackupCache::open_in_memory().await.unwrap();
        cache.set("k", json!(1), None).await.unwrap();
        cache.set("k", json!(2), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn expired_rows_read_as_absent() {
        let cache = SqliteBackupCache::open_in_memory().await.unwrap();
        cache.set("k", json!(1), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let cache = SqliteBackupCache::open_in_memory().await.unwrap();
        cache.set("stale", json!(1), Some(Duration::ZERO)).await.unwrap();
        cache.set("fresh", json!(2), Some(Duration::from_secs(600))).await.unwrap();
        cache.set("forever", json!(3), None).await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.get("fresh").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.get("forever").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn remove_erases_entry() {
        let cache = SqliteBackupCache::open_in_memory().await.unwrap();
        cache.set("k", json!(1), None).await.unwrap();
        cache.remove("k").await.unwrap();
        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn open_creates_file_database() {
        let dir = std::env::temp_dir().join(format!("idwallet-cache-{}", uuid::Uuid::now_v7()));
        let path = dir.join("cache.db");

        {
            let cache = SqliteBackupCache::open(&path).await.unwrap();
            cache.set("k", json!("persisted"), None).await.unwrap();
        }

        let reopened = SqliteBackupCache::open(&path).await.unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!("persisted")));

        let _ = std::fs::remove_dir_all(dir);
    }
}
