//! Redis cache-aside accessor
//!
//! Wraps a multiplexed Redis connection behind a small typed API:
//!
//! - `get_cached` / `set_cached`: JSON-serialized values with per-entry TTLs
//! - `get_or_set`: the cache-aside pattern in one call — return the hit, or
//!   run the fetch closure, store the result, and return it
//! - `invalidate_namespace`: bulk deletion by `namespace:*` key prefix
//!
//! The typed operations live on the [`CacheStore`] trait over raw byte
//! get/set, with [`CacheAccessor`] as the Redis-backed implementation; the
//! underlying [`ConnectionManager`] multiplexes commands over one connection
//! and reconnects automatically, so `CacheAccessor` is `Clone` and cheap to
//! share across tasks.

use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, info, warn};

/// Keys are deleted in batches this size during namespace invalidation so a
/// huge namespace never produces one enormous DEL command.
const INVALIDATE_CHUNK: usize = 500;

/// Byte-level cache operations, the seam between the typed cache-aside API
/// and the Redis transport
///
/// [`CacheAccessor`] is the production implementation; tests substitute an
/// in-memory map to exercise the hit/miss/fetch flow without a server. The
/// typed methods are provided on the trait so every implementation shares
/// the same serialization and cache-aside semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw payload for a key; `None` on miss
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a raw payload with a TTL in seconds
    async fn set_bytes(&self, key: &str, bytes: Vec<u8>, ttl_seconds: u64) -> Result<()>;

    /// Fetch and deserialize a cached value; `None` on miss
    async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => {
                debug!(key, "cache hit");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => {
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Serialize and store a value with a TTL in seconds
    async fn set_cached<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set_bytes(key, bytes, ttl_seconds).await
    }

    /// Cache-aside in one call: return the cached value, or fetch, store,
    /// and return it
    ///
    /// The fetch closure only runs on a miss. A fetch error propagates
    /// without writing anything to the cache.
    async fn get_or_set<T, F, Fut>(&self, key: &str, ttl_seconds: u64, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if let Some(hit) = self.get_cached(key).await? {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set_cached(key, &value, ttl_seconds).await?;
        Ok(value)
    }
}

/// Shared handle to the Redis cache
#[derive(Clone)]
pub struct CacheAccessor {
    conn: ConnectionManager,
}

impl CacheAccessor {
    /// Connect to Redis and verify the connection with a PING
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("connecting to redis cache");
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        let accessor = Self { conn };
        accessor.ping().await?;
        info!("redis cache connection established");
        Ok(accessor)
    }

    /// Clone of the underlying multiplexed connection, for collaborators
    /// that issue their own commands (e.g. the rate limiter)
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Liveness check: PING must answer PONG
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            warn!(response = %pong, "unexpected PING response from redis");
        }
        Ok(())
    }

    /// Delete a single key; returns whether it existed
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Delete every key under `namespace:*`; returns the number removed
    ///
    /// Uses SCAN rather than KEYS so a large keyspace never blocks the
    /// server, then deletes the matches in pipelined chunks.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<usize> {
        let pattern = namespace_pattern(namespace);
        let mut conn = self.conn.clone();

        // Collect first: scan_match holds a mutable borrow of the connection
        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }
        for chunk in keys.chunks(INVALIDATE_CHUNK) {
            let mut pipe = redis::pipe();
            for key in chunk {
                pipe.del(key).ignore();
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        info!(namespace, removed = keys.len(), "cache namespace invalidated");
        Ok(keys.len())
    }

    /// Release the handle. The multiplexed connection closes when the last
    /// clone drops; this exists so shutdown can log the step explicitly.
    pub fn close(self) {
        info!("redis cache connection released");
    }
}

#[async_trait]
impl CacheStore for CacheAccessor {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_bytes(&self, key: &str, bytes: Vec<u8>, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, bytes, ttl_seconds).await?;
        Ok(())
    }
}

fn namespace_pattern(namespace: &str) -> String {
    format!("{namespace}:*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        name: String,
    }

    /// In-memory byte store standing in for Redis
    struct MemoryStore {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        refuse_writes: bool,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
                refuse_writes: false,
            }
        }
    }

    #[async_trait]
    impl CacheStore for MemoryStore {
        async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn set_bytes(&self, key: &str, bytes: Vec<u8>, _ttl_seconds: u64) -> Result<()> {
            if self.refuse_writes {
                return Err(Error::config("cache writes refused"));
            }
            self.entries.lock().insert(key.to_string(), bytes);
            Ok(())
        }
    }

    fn profile() -> Profile {
        Profile {
            id: 7,
            name: "ada".to_string(),
        }
    }

    #[tokio::test]
    async fn test_get_or_set_fetches_on_miss_only() {
        let store = MemoryStore::new();
        let fetches = AtomicUsize::new(0);

        let first: Profile = store
            .get_or_set("user:7", 60, || {
                fetches.fetch_add(1, Ordering::SeqCst);
                async { Ok(profile()) }
            })
            .await
            .unwrap();
        assert_eq!(first, profile());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Hit: the second fetch closure must never run
        let second: Profile = store
            .get_or_set("user:7", 60, || {
                fetches.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok(Profile {
                        id: 999,
                        name: "wrong".to_string(),
                    })
                }
            })
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_fetch_error_writes_nothing() {
        let store = MemoryStore::new();

        let result: Result<Profile> = store
            .get_or_set("user:7", 60, || async {
                Err(Error::Query("users table unavailable".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::Query(_))));
        assert!(store.entries.lock().is_empty());

        // A later miss still fetches
        let fetched: Profile = store
            .get_or_set("user:7", 60, || async { Ok(profile()) })
            .await
            .unwrap();
        assert_eq!(fetched, profile());
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips_typed_values() {
        let store = MemoryStore::new();
        store.set_cached("user:7", &profile(), 60).await.unwrap();

        let hit: Option<Profile> = store.get_cached("user:7").await.unwrap();
        assert_eq!(hit, Some(profile()));

        let miss: Option<Profile> = store.get_cached("user:8").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_stored_payload_surfaces_as_serialization_error() {
        let store = MemoryStore::new();
        store
            .entries
            .lock()
            .insert("user:7".to_string(), b"not json".to_vec());

        let result: Result<Option<Profile>> = store.get_cached("user:7").await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_failed_write_propagates_after_fetch() {
        let store = MemoryStore {
            entries: Mutex::new(HashMap::new()),
            refuse_writes: true,
        };

        let result: Result<Profile> = store
            .get_or_set("user:7", 60, || async { Ok(profile()) })
            .await;
        assert!(result.is_err());
        assert!(store.entries.lock().is_empty());
    }

    #[test]
    fn test_namespace_pattern_shape() {
        assert_eq!(namespace_pattern("user"), "user:*");
        assert_eq!(namespace_pattern("session:v2"), "session:v2:*");
    }
}
