//! In-process cache backend.
//!
//! One `std::sync::Mutex` guards the [`LruStore`]. The lock is never held
//! across an `.await`; every trait method does its work synchronously and
//! returns. `get` reorders the recency list, so it takes the same exclusive
//! lock as `set`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use memora_core::{CacheEntry, CacheError, CacheKey, CacheValue, MemoraResult, DEFAULT_MAX_KEYS};
use tracing::debug;

use crate::lru::LruStore;
use crate::traits::{BackendStats, CacheBackend, CachedKeyInfo, Invalidation};

/// Hit, miss and eviction counters shared by the local backends.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, n: usize) {
        if n > 0 {
            self.evictions.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn fill(&self, stats: &mut BackendStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.evictions = self.evictions.load(Ordering::Relaxed);
    }
}

/// Result of [`MemoryCacheBackend::check_integrity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    pub entries: usize,
    pub order_len: usize,
    pub max_keys: usize,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.entries == self.order_len && self.entries <= self.max_keys
    }
}

/// Bounded in-memory cache with LRU eviction.
///
/// # Example
///
/// ```ignore
/// use memora_storage::{CacheBackend, MemoryCacheBackend};
/// use memora_core::CacheKey;
///
/// let cache = MemoryCacheBackend::new(100);
/// cache.set(&CacheKey::new("blame|/repo"), 42.into()).await?;
/// let hit = cache.get(&CacheKey::new("blame|/repo")).await?;
/// ```
#[derive(Debug)]
pub struct MemoryCacheBackend {
    store: Mutex<LruStore>,
    max_keys: usize,
    counters: Counters,
}

impl MemoryCacheBackend {
    pub fn new(max_keys: usize) -> Self {
        Self {
            store: Mutex::new(LruStore::new(max_keys)),
            max_keys,
            counters: Counters::default(),
        }
    }

    /// Wrap an already populated store (used when restoring a snapshot).
    pub(crate) fn from_store(store: LruStore) -> Self {
        let max_keys = store.max_keys();
        Self {
            store: Mutex::new(store),
            max_keys,
            counters: Counters::default(),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, LruStore>, CacheError> {
        self.store.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Entry and ordering counts, for monitoring and tests.
    pub fn check_integrity(&self) -> MemoraResult<IntegrityReport> {
        let store = self.lock()?;
        Ok(IntegrityReport {
            entries: store.len(),
            order_len: store.order_len(),
            max_keys: store.max_keys(),
        })
    }

    /// Number of entries currently held.
    pub fn len(&self) -> MemoraResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> MemoraResult<bool> {
        Ok(self.lock()?.is_empty())
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYS)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn max_keys(&self) -> usize {
        self.max_keys
    }

    async fn get(&self, key: &CacheKey) -> MemoraResult<Option<CacheEntry>> {
        let found = self.lock()?.get(key);
        match &found {
            Some(_) => {
                self.counters.hit();
                debug!(key = %key, "cache hit");
            }
            None => {
                self.counters.miss();
                debug!(key = %key, "cache miss");
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &CacheKey, value: CacheValue) -> MemoraResult<()> {
        let evicted = self.lock()?.insert(key.clone(), value);
        self.counters.evicted(evicted.len());
        debug!(key = %key, evicted = evicted.len(), "cache write");
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> MemoraResult<bool> {
        Ok(self.lock()?.contains(key))
    }

    async fn evict(&self, count: usize) -> MemoraResult<usize> {
        let evicted = self.lock()?.evict(count).len();
        self.counters.evicted(evicted);
        Ok(evicted)
    }

    async fn invalidate(&self, scope: &Invalidation) -> MemoraResult<usize> {
        let removed = self.lock()?.invalidate(scope);
        debug!(removed, "cache invalidated");
        Ok(removed)
    }

    async fn stats(&self) -> MemoraResult<BackendStats> {
        let mut stats = self.lock()?.stats(Utc::now());
        self.counters.fill(&mut stats);
        Ok(stats)
    }

    async fn list_keys(&self) -> MemoraResult<Vec<CachedKeyInfo>> {
        Ok(self.lock()?.list_keys(Utc::now()))
    }

    async fn cache_info(&self, key: &CacheKey) -> MemoraResult<Option<CachedKeyInfo>> {
        let store = self.lock()?;
        Ok(store
            .peek(key)
            .map(|entry| CachedKeyInfo::from_entry(key.clone(), entry, Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::KeyPattern;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    async fn order(cache: &MemoryCacheBackend) -> Vec<String> {
        cache
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.key.into_string())
            .collect()
    }

    #[tokio::test]
    async fn test_get_set_exists() {
        let cache = MemoryCacheBackend::new(10);
        assert!(cache.get(&key("a")).await.unwrap().is_none());
        cache.set(&key("a"), CacheValue::Int(1)).await.unwrap();

        let entry = cache.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(entry.value(), &CacheValue::Int(1));
        assert!(cache.exists(&key("a")).await.unwrap());
        assert!(!cache.exists(&key("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_lru_scenario() {
        let cache = MemoryCacheBackend::new(3);
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
    async fn test_exists_and_cache_info_do_not_reorder() {
        let cache = MemoryCacheBackend::new(3);
        cache.set(&key("a"), 1.into()).await.unwrap();
        cache.set(&key("b"), 2.into()).await.unwrap();

        assert!(cache.exists(&key("a")).await.unwrap());
        assert!(cache.cache_info(&key("a")).await.unwrap().is_some());
        assert_eq!(order(&cache).await, vec!["a", "b"]);
        assert!(cache.cache_info(&key("zzz")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counters_and_stats() {
        let cache = MemoryCacheBackend::new(2);
        cache.set(&key("a"), 1.into()).await.unwrap();
        cache.get(&key("a")).await.unwrap();
        cache.get(&key("missing")).await.unwrap();
        cache.set(&key("b"), 2.into()).await.unwrap();
        cache.set(&key("c"), 3.into()).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.max_entries, 2);
        assert!((stats.usage_percent - 100.0).abs() < f64::EPSILON);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert!(stats.oldest_age.is_some());
    }

    #[tokio::test]
    async fn test_evict_and_invalidate() {
        let cache = MemoryCacheBackend::new(10);
        for k in ["m|/r|1", "m|/r|2", "n|/r|1"] {
            cache.set(&key(k), CacheValue::Null).await.unwrap();
        }

        assert_eq!(cache.evict(1).await.unwrap(), 1);
        assert!(!cache.exists(&key("m|/r|1")).await.unwrap());

        let pattern = Invalidation::Pattern(KeyPattern::glob("m|*").unwrap());
        assert_eq!(cache.invalidate(&pattern).await.unwrap(), 1);
        assert_eq!(cache.invalidate(&Invalidation::All).await.unwrap(), 1);
        assert!(cache.is_empty().unwrap());

        let report = cache.check_integrity().unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.entries, 0);
    }

    #[tokio::test]
    async fn test_max_keys_one() {
        let cache = MemoryCacheBackend::new(1);
        cache.set(&key("a"), 1.into()).await.unwrap();
        cache.set(&key("b"), 2.into()).await.unwrap();
        assert_eq!(order(&cache).await, vec!["b"]);
        assert_eq!(cache.max_keys(), 1);
    }
}
