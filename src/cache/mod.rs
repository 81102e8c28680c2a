use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::GateResult;

/// Key/value store the session layer is built on.
///
/// Backends are owned by the embedding application and may be shared with
/// other consumers.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store a value that lives until `ttl_minutes` elapse or it is deleted
    async fn store(&self, prefix: &str, key: &str, value: Value, ttl_minutes: u64) -> GateResult<()>;

    /// Read a value. A `Some` TTL restarts the entry's expiry window.
    async fn read(&self, prefix: &str, key: &str, ttl_minutes: Option<u64>) -> GateResult<Option<Value>>;

    /// Delete a value; deleting an absent key is a no-op
    async fn delete(&self, prefix: &str, key: &str) -> GateResult<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Expired entries are swept on every this many writes
const PURGE_EVERY_WRITES: u64 = 64;

/// Process-local cache with per-entry expiry.
///
/// Expired entries are invisible to reads and get swept periodically from
/// `store`, so keys that are never read again do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn compose_key(prefix: &str, key: &str) -> String {
        format!("{}{}", prefix, key)
    }

    fn deadline(ttl_minutes: u64) -> DateTime<Utc> {
        let minutes = i64::try_from(ttl_minutes).unwrap_or(i64::MAX);
        Duration::try_minutes(minutes)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.write().await.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    pub(crate) async fn raw_len(&self) -> usize {
        self.entries.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn expire_now(&self, prefix: &str, key: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(&Self::compose_key(prefix, key)) {
            entry.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn store(&self, prefix: &str, key: &str, value: Value, ttl_minutes: u64) -> GateResult<()> {
        let entry = CacheEntry {
            value,
            expires_at: Self::deadline(ttl_minutes),
        };
        let mut entries = self.entries.write().await;

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_EVERY_WRITES == 0 {
            let now = Utc::now();
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at > now);
            tracing::trace!("Purged {} expired cache entries", before - entries.len());
        }

        entries.insert(Self::compose_key(prefix, key), entry);
        Ok(())
    }

    async fn read(&self, prefix: &str, key: &str, ttl_minutes: Option<u64>) -> GateResult<Option<Value>> {
        let composed = Self::compose_key(prefix, key);
        let now = Utc::now();

        // Sliding reads mutate the deadline, so they take the write lock
        let Some(ttl) = ttl_minutes else {
            let entries = self.entries.read().await;
            return Ok(entries
                .get(&composed)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.value.clone()));
        };

        let mut entries = self.entries.write().await;
        match entries.get_mut(&composed) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = Self::deadline(ttl);
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                entries.remove(&composed);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, prefix: &str, key: &str) -> GateResult<()> {
        self.entries
            .write()
            .await
            .remove(&Self::compose_key(prefix, key));
        Ok(())
    }
}
