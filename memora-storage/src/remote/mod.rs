//! Remote key-value store backend.
//!
//! [`RemoteCacheBackend`] keeps entries in an external store (Redis in
//! production, [`InMemoryRemoteStore`] for single-host use and tests). Every
//! key is written as `<namespace><cache key>` so several caches can share one
//! server. Values are stored as entry bytes (see [`crate::codec`]), with an
//! optional TTL.
//!
//! The backend keeps a local [`RecencyOrder`] of the keys it knows about and
//! uses it to decide what to evict. The order is guarded by a
//! `tokio::sync::Mutex` that stays locked across the network call which
//! reorders it. [`RemoteCacheBackend::sync`] rebuilds the view from the keys
//! currently present remotely and trims it back to `max_keys`.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use memora_core::{CacheEntry, CacheKey, CacheValue, MemoraResult};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

pub use in_memory::InMemoryRemoteStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

use crate::codec;
use crate::lru::RecencyOrder;
use crate::memory::Counters;
use crate::traits::{BackendStats, CacheBackend, CachedKeyInfo, Invalidation};

/// Minimal key-value operations the remote backend needs.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store name used in errors and logs.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> MemoraResult<Option<Vec<u8>>>;

    /// Write `value`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MemoraResult<()>;

    async fn exists(&self, key: &str) -> MemoraResult<bool>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> MemoraResult<usize>;

    /// Every key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> MemoraResult<Vec<String>>;
}

/// LRU cache over a [`RemoteStore`].
pub struct RemoteCacheBackend<S> {
    store: S,
    namespace: String,
    ttl: Option<Duration>,
    max_keys: usize,
    order: AsyncMutex<RecencyOrder>,
    counters: Counters,
}

impl<S: RemoteStore> RemoteCacheBackend<S> {
    /// Create the backend and load the current remote key set, evicting
    /// the oldest keys if the namespace already holds more than `max_keys`.
    pub async fn connect(
        store: S,
        namespace: impl Into<String>,
        max_keys: usize,
        ttl: Option<Duration>,
    ) -> MemoraResult<Self> {
        let backend = Self {
            store,
            namespace: namespace.into(),
            ttl,
            max_keys,
            order: AsyncMutex::new(RecencyOrder::new()),
            counters: Counters::default(),
        };
        let known = backend.sync().await?;
        info!(
            store = backend.store.name(),
            namespace = %backend.namespace,
            known,
            "remote cache connected"
        );
        Ok(backend)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn remote_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.namespace, key.as_str())
    }

    fn local_key(&self, remote: &str) -> Option<CacheKey> {
        remote.strip_prefix(&self.namespace).map(CacheKey::new)
    }

    async fn remote_keys(&self) -> MemoraResult<Vec<CacheKey>> {
        Ok(self
            .store
            .scan_prefix(&self.namespace)
            .await?
            .iter()
            .filter_map(|k| self.local_key(k))
            .collect())
    }

    /// Replace the local key view with the keys present remotely.
    ///
    /// Keys already known keep their relative order; newly discovered keys
    /// are appended oldest first by their stored timestamp. When the view
    /// then holds more than `max_keys`, the oldest keys are evicted from the
    /// store. Returns the number of keys in the view.
    pub async fn sync(&self) -> MemoraResult<usize> {
        let mut order = self.order.lock().await;
        let mut remote = self.remote_keys().await?;
        remote.sort();

        let known: Vec<CacheKey> = order
            .iter()
            .filter(|k| remote.binary_search(k).is_ok())
            .cloned()
            .collect();
        let mut discovered = Vec::new();
        for key in remote.into_iter().filter(|k| !known.contains(k)) {
            // Unreadable entries sort first and go first.
            let cached_at = self.key_info(&key).await?.map(|info| info.cached_at);
            discovered.push((cached_at, key));
        }
        discovered.sort();
        order.replace(known.into_iter().chain(discovered.into_iter().map(|(_, k)| k)));

        let mut evicted = Vec::new();
        while order.len() > self.max_keys {
            match order.pop_oldest() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        self.delete_local(&evicted).await?;
        self.counters.evicted(evicted.len());
        debug!(
            namespace = %self.namespace,
            keys = order.len(),
            evicted = evicted.len(),
            "remote key view synced"
        );
        Ok(order.len())
    }

    /// Delete every key in this namespace. Returns how many were removed.
    pub async fn purge(&self) -> MemoraResult<usize> {
        let mut order = self.order.lock().await;
        let keys = self.store.scan_prefix(&self.namespace).await?;
        let removed = if keys.is_empty() {
            0
        } else {
            self.store.delete(&keys).await?
        };
        order.clear();
        info!(namespace = %self.namespace, removed, "remote cache purged");
        Ok(removed)
    }

    async fn delete_local(&self, keys: &[CacheKey]) -> MemoraResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let remote: Vec<String> = keys.iter().map(|k| self.remote_key(k)).collect();
        self.store.delete(&remote).await
    }

    async fn key_info(&self, key: &CacheKey) -> MemoraResult<Option<CachedKeyInfo>> {
        let Some(bytes) = self.store.get(&self.remote_key(key)).await? else {
            return Ok(None);
        };
        match codec::decode_entry_timestamp(&bytes) {
            Ok(cached_at) => {
                let age = Utc::now()
                    .signed_duration_since(cached_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                Ok(Some(CachedKeyInfo {
                    key: key.clone(),
                    cached_at,
                    age,
                }))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable remote entry");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S: RemoteStore> CacheBackend for RemoteCacheBackend<S> {
    fn name(&self) -> &str {
        "remote"
    }

    fn max_keys(&self) -> usize {
        self.max_keys
    }

    async fn get(&self, key: &CacheKey) -> MemoraResult<Option<CacheEntry>> {
        let mut order = self.order.lock().await;
        let remote_key = self.remote_key(key);

        let Some(bytes) = self.store.get(&remote_key).await? else {
            // Expired or removed by another process.
            order.remove(key);
            self.counters.miss();
            debug!(key = %key, "cache miss");
            return Ok(None);
        };

        match codec::decode_entry_bytes(&bytes) {
            Ok(entry) => {
                order.touch(key);
                self.counters.hit();
                debug!(key = %key, "cache hit");
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable remote entry");
                self.store.delete(&[remote_key]).await?;
                order.remove(key);
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: CacheValue) -> MemoraResult<()> {
        let entry = CacheEntry::new(value);
        let bytes = codec::encode_entry_bytes(&entry).map_err(|e| e.for_key(key))?;

        let mut order = self.order.lock().await;
        self.store.set(&self.remote_key(key), bytes, self.ttl).await?;
        order.touch(key);

        let mut evicted = Vec::new();
        while order.len() > self.max_keys {
            match order.pop_oldest() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        self.delete_local(&evicted).await?;
        self.counters.evicted(evicted.len());
        debug!(key = %key, evicted = evicted.len(), "cache write");
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> MemoraResult<bool> {
        self.store.exists(&self.remote_key(key)).await
    }

    async fn evict(&self, count: usize) -> MemoraResult<usize> {
        let mut order = self.order.lock().await;
        let mut evicted = Vec::with_capacity(count.min(order.len()));
        for _ in 0..count {
            match order.pop_oldest() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        self.delete_local(&evicted).await?;
        self.counters.evicted(evicted.len());
        Ok(evicted.len())
    }

    async fn invalidate(&self, scope: &Invalidation) -> MemoraResult<usize> {
        let mut order = self.order.lock().await;

        let doomed: Vec<CacheKey> = match scope {
            Invalidation::Keys(keys) => keys.clone(),
            Invalidation::Pattern(pattern) => {
                let prefix = format!("{}{}", self.namespace, pattern.literal_prefix());
                self.store
                    .scan_prefix(&prefix)
                    .await?
                    .iter()
                    .filter_map(|k| self.local_key(k))
                    .filter(|k| pattern.matches(k.as_str()))
                    .collect()
            }
            Invalidation::All => self.remote_keys().await?,
        };

        let removed = self.delete_local(&doomed).await?;
        order.retain(|k| !doomed.contains(k));
        debug!(removed, "cache invalidated");
        Ok(removed)
    }

    async fn stats(&self) -> MemoraResult<BackendStats> {
        let keys = self.remote_keys().await?;
        let mut stamps = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(info) = self.key_info(key).await? {
                stamps.push(info.cached_at);
            }
        }
        let mut stats = BackendStats::from_timestamps(stamps, self.max_keys, Utc::now());
        self.counters.fill(&mut stats);
        Ok(stats)
    }

    async fn list_keys(&self) -> MemoraResult<Vec<CachedKeyInfo>> {
        let keys: Vec<CacheKey> = self.order.lock().await.iter().cloned().collect();
        let mut infos = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(info) = self.key_info(key).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn cache_info(&self, key: &CacheKey) -> MemoraResult<Option<CachedKeyInfo>> {
        self.key_info(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::KeyPattern;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    async fn backend(max_keys: usize) -> RemoteCacheBackend<InMemoryRemoteStore> {
        RemoteCacheBackend::connect(InMemoryRemoteStore::new(), "test:", max_keys, None)
            .await
            .unwrap()
    }

    async fn order(cache: &RemoteCacheBackend<InMemoryRemoteStore>) -> Vec<String> {
        cache
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.key.into_string())
            .collect()
    }

    #[tokio::test]
    async fn test_namespaced_storage() {
        let cache = backend(10).await;
        cache.set(&key("blame|/r"), CacheValue::Int(7)).await.unwrap();

        assert!(cache.store().exists("test:blame|/r").await.unwrap());
        let entry = cache.get(&key("blame|/r")).await.unwrap().unwrap();
        assert_eq!(entry.value(), &CacheValue::Int(7));
    }

    #[tokio::test]
    async fn test_lru_scenario() {
        let cache = backend(3).await;
        for k in ["k1", "k2", "k3", "k4"] {
            cache.set(&key(k), k.into()).await.unwrap();
        }
        assert!(!cache.exists(&key("k1")).await.unwrap());
        cache.get(&key("k2")).await.unwrap();
        cache.set(&key("k5"), "k5".into()).await.unwrap();
        assert!(!cache.exists(&key("k3")).await.unwrap());
        assert_eq!(order(&cache).await, vec!["k4", "k2", "k5"]);
    }

    #[tokio::test]
    async fn test_sync_picks_up_existing_keys() {
        let store = InMemoryRemoteStore::new();
        let first = RemoteCacheBackend::connect(store.clone(), "ns:", 10, None)
            .await
            .unwrap();
        first.set(&key("a"), 1.into()).await.unwrap();
        first.set(&key("b"), 2.into()).await.unwrap();
        // Foreign namespace is ignored.
        store.set("other:c", vec![0; 8], None).await.unwrap();

        let second = RemoteCacheBackend::connect(store, "ns:", 10, None).await.unwrap();
        assert_eq!(second.stats().await.unwrap().total_entries, 2);
        assert_eq!(order(&second).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_connect_trims_oversized_namespace() {
        let store = InMemoryRemoteStore::new();
        for n in 0..10i64 {
            let entry = CacheEntry::with_timestamp(
                CacheValue::Int(n),
                chrono::DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap(),
            );
            let bytes = codec::encode_entry_bytes(&entry).unwrap();
            store.set(&format!("ns:k{}", n), bytes, None).await.unwrap();
        }

        let cache = RemoteCacheBackend::connect(store.clone(), "ns:", 3, None)
            .await
            .unwrap();
        assert_eq!(order(&cache).await, vec!["k7", "k8", "k9"]);
        assert_eq!(store.len().unwrap(), 3);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.evictions, 7);
        assert_eq!(cache.sync().await.unwrap(), 3);

        // Writes keep the bound after the trim.
        cache.set(&key("fresh"), 1.into()).await.unwrap();
        assert_eq!(order(&cache).await, vec!["k8", "k9", "fresh"]);
        assert_eq!(store.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_externally_deleted_key_leaves_view() {
        let cache = backend(10).await;
        cache.set(&key("a"), 1.into()).await.unwrap();
        cache.store().delete(&["test:a".to_string()]).await.unwrap();

        assert!(cache.get(&key("a")).await.unwrap().is_none());
        assert!(order(&cache).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let cache = backend(10).await;
        for k in ["m|/r|1", "m|/r|2", "n|/r|1"] {
            cache.set(&key(k), CacheValue::Null).await.unwrap();
        }
        let pattern = Invalidation::Pattern(KeyPattern::glob("m|*").unwrap());
        assert_eq!(cache.invalidate(&pattern).await.unwrap(), 2);
        assert_eq!(order(&cache).await, vec!["n|/r|1"]);

        let keys = Invalidation::Keys(vec![key("n|/r|1"), key("missing")]);
        assert_eq!(cache.invalidate(&keys).await.unwrap(), 1);

        cache.set(&key("x"), CacheValue::Null).await.unwrap();
        assert_eq!(cache.purge().await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_unserializable_value_is_rejected() {
        let cache = backend(10).await;
        let err = cache.set(&key("nan"), CacheValue::Float(f64::NAN)).await.unwrap_err();
        assert!(!err.is_unavailable());
        assert!(!cache.exists(&key("nan")).await.unwrap());
    }

    #[tokio::test]
    async fn test_outage_surfaces_as_unavailable() {
        let cache = backend(10).await;
        cache.store().set_online(false);
        let err = cache.get(&key("a")).await.unwrap_err();
        assert!(err.is_unavailable());
        cache.store().set_online(true);
        assert!(cache.get(&key("a")).await.unwrap().is_none());
    }
}
