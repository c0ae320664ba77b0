//! Backup cache contract: keyed, TTL-bearing mirror of queue items.
//!
//! The queue engine mirrors every item here so it survives a restart even if
//! the item store does not. The cache is eventually consistent with the store
//! and is only read during dependency checks and startup restoration.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CacheError;

/// Key of the JSON array listing every mirrored item id.
pub const QUEUE_INDEX_KEY: &str = "queue_index";

/// Keyed JSON store with optional per-entry expiry.
#[async_trait]
pub trait BackupCache: Send + Sync {
    /// Insert or replace `key`. `ttl: None` never expires.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Read `key`; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Erase `key`. Erasing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Compute the absolute expiry for a TTL starting now.
/// TTLs too large to represent never expire.
pub(crate) fn expiry_from(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
}

pub(crate) fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|at| Utc::now() >= at)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory backup cache for tests/dev.
///
/// Expiry is enforced lazily when an entry is read.
#[derive(Debug, Default)]
pub struct InMemoryBackupCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryBackupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BackupCache for InMemoryBackupCache {
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: expiry_from(ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if is_expired(entry.expires_at) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = InMemoryBackupCache::new();
        cache
            .set("queue_a", json!({"id": "a"}), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(cache.get("queue_a").await.unwrap(), Some(json!({"id": "a"})));
        assert_eq!(cache.get("queue_b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent_and_are_dropped() {
        let cache = InMemoryBackupCache::new();
        cache.set("queue_a", json!(1), Some(Duration::ZERO)).await.unwrap();

        assert_eq!(cache.get("queue_a").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn entries_without_ttl_never_expire() {
        let cache = InMemoryBackupCache::new();
        cache.set(QUEUE_INDEX_KEY, json!([]), None).await.unwrap();
        assert_eq!(cache.get(QUEUE_INDEX_KEY).await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let cache = InMemoryBackupCache::new();
        cache.set("queue_a", json!(1), None).await.unwrap();
        cache.remove("queue_a").await.unwrap();
        cache.remove("queue_a").await.unwrap();
        assert_eq!(cache.get("queue_a").await.unwrap(), None);
    }
}
