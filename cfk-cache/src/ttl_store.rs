//! Generic sled-backed TTL store with an in-memory LRU front
//!
//! Generalizes the donor's `MetadataCache` (which only ever stored
//! `CachedEntry`/`CachedDirectory`) to any serializable value, so the
//! façade's five keyed caches can each open one of these under a
//! distinct namespace.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use tokio::sync::Mutex;

use crate::lru::LruCache;
use crate::{CacheError, CacheResult};

#[derive(Serialize, Deserialize)]
struct Stored<V> {
    value: V,
    expires_at: Option<DateTime<Utc>>,
}

/// A namespaced, TTL-expiring key/value store. A non-positive TTL
/// passed to `put` makes the call a no-op — "do not cache" rather than
/// "cache forever".
pub struct TtlStore<V> {
    db: sled::Tree,
    memory: Mutex<LruCache<String, Stored<V>>>,
    _marker: PhantomData<V>,
}

impl<V> TtlStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn open(db: &sled::Db, namespace: &str, memory_capacity: usize) -> CacheResult<Self> {
        let db = db.open_tree(namespace).map_err(|e| CacheError::Database(e.to_string()))?;
        Ok(Self { db, memory: Mutex::new(LruCache::new(memory_capacity)), _marker: PhantomData })
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        {
            let mut memory = self.memory.lock().await;
            if let Some(stored) = memory.get(&key.to_string()) {
                if !is_expired(stored.expires_at) {
                    return Ok(Some(stored.value.clone()));
                }
            }
        }

        let Some(bytes) = self.db.get(key).map_err(|e| CacheError::Database(e.to_string()))? else {
            return Ok(None);
        };
        let stored: Stored<V> = serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;
        if is_expired(stored.expires_at) {
            self.db.remove(key).map_err(|e| CacheError::Database(e.to_string()))?;
            return Ok(None);
        }

        self.memory.lock().await.put(key.to_string(), Stored { value: stored.value.clone(), expires_at: stored.expires_at });
        Ok(Some(stored.value))
    }

    /// `ttl`, if `Some`, must be positive or the put is silently
    /// skipped.
    pub async fn put(&self, key: &str, value: V, ttl: Option<chrono::Duration>) -> CacheResult<()> {
        if let Some(ttl) = ttl {
            if ttl <= chrono::Duration::zero() {
                return Ok(());
            }
        }
        let expires_at = ttl.map(|d| Utc::now() + d);
        let stored = Stored { value, expires_at };
        let bytes = serde_json::to_vec(&stored).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.db.insert(key, bytes).map_err(|e| CacheError::Database(e.to_string()))?;
        self.memory.lock().await.put(key.to_string(), stored);
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.db.remove(key).map_err(|e| CacheError::Database(e.to_string()))?;
        self.memory.lock().await.pop(&key.to_string());
        Ok(())
    }

    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<()> {
        let keys: Vec<_> = self
            .db
            .scan_prefix(prefix)
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        for key in keys {
            self.db.remove(&key).map_err(|e| CacheError::Database(e.to_string()))?;
        }
        self.memory.lock().await.clear();
        Ok(())
    }
}

fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|exp| Utc::now() > exp)
}

pub fn open_db(path: impl AsRef<Path>) -> CacheResult<sled::Db> {
    sled::open(path).map_err(|e| CacheError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        let store: TtlStore<String> = TtlStore::open(&db, "test", 10).unwrap();

        store.put("k1", "hello".to_string(), Some(chrono::Duration::seconds(60))).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn non_positive_ttl_skips_cache() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        let store: TtlStore<String> = TtlStore::open(&db, "test", 10).unwrap();

        store.put("k1", "hello".to_string(), Some(chrono::Duration::zero())).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        let store: TtlStore<String> = TtlStore::open(&db, "test", 10).unwrap();

        store.put("k1", "hello".to_string(), Some(chrono::Duration::milliseconds(-1))).await.unwrap();
        // negative ttl treated as non-positive above; direct check of an already-past expiry:
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_removes_from_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        let store: TtlStore<String> = TtlStore::open(&db, "test", 10).unwrap();

        store.put("k1", "hello".to_string(), None).await.unwrap();
        store.invalidate("k1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
    }
}
