//! Cache backend trait and the reports it produces.
//!
//! Every storage variant (in-memory, disk, remote) implements
//! [`CacheBackend`]. The trait is dyn-compatible so owners can hold an
//! `Arc<dyn CacheBackend>` without knowing which variant is behind it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memora_core::{CacheEntry, CacheKey, CacheValue, MemoraResult};

use crate::pattern::KeyPattern;

/// Cache backend trait for pluggable cache implementations.
///
/// # Ordering
///
/// Backends keep their entries in least-recently-used order. `get` and `set`
/// move the key to the most-recently-used end; `exists`, `stats`,
/// `list_keys` and `cache_info` never reorder.
///
/// # Misses
///
/// A miss is `Ok(None)`, never an error. Errors mean the backing store could
/// not answer at all.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short variant name reported in statistics.
    fn name(&self) -> &str;

    /// Upper bound on the number of entries.
    fn max_keys(&self) -> usize;

    /// Look up an entry. A hit marks the key most recently used.
    async fn get(&self, key: &CacheKey) -> MemoraResult<Option<CacheEntry>>;

    /// Insert or overwrite an entry stamped with the current time, then evict
    /// the oldest entries while the store is over its bound.
    async fn set(&self, key: &CacheKey, value: CacheValue) -> MemoraResult<()>;

    /// Whether `key` is present. Does not affect ordering.
    async fn exists(&self, key: &CacheKey) -> MemoraResult<bool>;

    /// Remove up to `count` least-recently-used entries.
    async fn evict(&self, count: usize) -> MemoraResult<usize>;

    /// Remove the entries selected by `scope`, returning how many were removed.
    async fn invalidate(&self, scope: &Invalidation) -> MemoraResult<usize>;

    /// Size and age summary.
    async fn stats(&self) -> MemoraResult<BackendStats>;

    /// Every cached key with its timestamp, least recently used first.
    async fn list_keys(&self) -> MemoraResult<Vec<CachedKeyInfo>>;

    /// Timestamp information for one key. Does not affect ordering.
    async fn cache_info(&self, key: &CacheKey) -> MemoraResult<Option<CachedKeyInfo>>;
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone)]
pub enum Invalidation {
    /// Exactly these keys.
    Keys(Vec<CacheKey>),
    /// Every key the pattern matches.
    Pattern(KeyPattern),
    /// Everything.
    All,
}

impl Invalidation {
    /// Build an invalidation from optional keys and pattern. Keys take
    /// precedence; with neither, everything is invalidated.
    pub fn from_parts(keys: Option<Vec<CacheKey>>, pattern: Option<KeyPattern>) -> Self {
        match (keys, pattern) {
            (Some(keys), _) => Invalidation::Keys(keys),
            (None, Some(pattern)) => Invalidation::Pattern(pattern),
            (None, None) => Invalidation::All,
        }
    }

    /// Whether `key` is selected.
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Invalidation::Keys(keys) => keys.contains(key),
            Invalidation::Pattern(pattern) => pattern.matches(key.as_str()),
            Invalidation::All => true,
        }
    }
}

/// Timestamp information about one cached key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedKeyInfo {
    pub key: CacheKey,
    pub cached_at: DateTime<Utc>,
    pub age: Duration,
}

impl CachedKeyInfo {
    pub fn from_entry(key: CacheKey, entry: &CacheEntry, now: DateTime<Utc>) -> Self {
        Self {
            key,
            cached_at: entry.cached_at(),
            age: entry.age(now),
        }
    }

    pub fn age_seconds(&self) -> f64 {
        self.age.as_secs_f64()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendStats {
    /// Number of entries currently in cache.
    pub total_entries: usize,
    /// Configured bound.
    pub max_entries: usize,
    /// `total_entries / max_entries * 100`.
    pub usage_percent: f64,
    /// Age of the oldest entry, `None` when empty.
    pub oldest_age: Option<Duration>,
    /// Age of the newest entry, `None` when empty.
    pub newest_age: Option<Duration>,
    /// Mean entry age, `None` when empty.
    pub average_age: Option<Duration>,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries removed to respect the bound or by explicit `evict`.
    pub evictions: u64,
}

impl BackendStats {
    /// Compute size and age figures from entry timestamps. Counters are left
    /// at zero for the caller to fill in.
    pub fn from_timestamps<I>(timestamps: I, max_entries: usize, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let mut count = 0usize;
        let mut oldest: Option<Duration> = None;
        let mut newest: Option<Duration> = None;
        let mut total = Duration::ZERO;

        for cached_at in timestamps {
            let age = now
                .signed_duration_since(cached_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            count += 1;
            total += age;
            oldest = Some(oldest.map_or(age, |o| o.max(age)));
            newest = Some(newest.map_or(age, |n| n.min(age)));
        }

        let average_age = (count > 0).then(|| total / count as u32);

        Self {
            total_entries: count,
            max_entries,
            usage_percent: usage_percent(count, max_entries),
            oldest_age: oldest,
            newest_age: newest,
            average_age,
            ..Self::default()
        }
    }

    pub fn oldest_age_hours(&self) -> Option<f64> {
        self.oldest_age.map(hours)
    }

    pub fn newest_age_hours(&self) -> Option<f64> {
        self.newest_age.map(hours)
    }

    pub fn average_age_hours(&self) -> Option<f64> {
        self.average_age.map(hours)
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub(crate) fn usage_percent(entries: usize, max_entries: usize) -> f64 {
    if max_entries == 0 {
        0.0
    } else {
        entries as f64 / max_entries as f64 * 100.0
    }
}

fn hours(d: Duration) -> f64 {
    d.as_secs_f64() / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_stats_from_timestamps() {
        let now = Utc::now();
        let stamps = vec![
            now - ChronoDuration::hours(2),
            now - ChronoDuration::hours(1),
            now,
        ];
        let stats = BackendStats::from_timestamps(stamps, 10, now);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.max_entries, 10);
        assert!((stats.usage_percent - 30.0).abs() < f64::EPSILON);
        assert_eq!(stats.oldest_age, Some(Duration::from_secs(7200)));
        assert_eq!(stats.newest_age, Some(Duration::ZERO));
        assert_eq!(stats.average_age, Some(Duration::from_secs(3600)));
        assert_eq!(stats.oldest_age_hours(), Some(2.0));
    }

    #[test]
    fn test_stats_empty() {
        let stats = BackendStats::from_timestamps(Vec::new(), 5, Utc::now());
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.usage_percent, 0.0);
        assert!(stats.oldest_age.is_none());
        assert!(stats.newest_age.is_none());
        assert!(stats.average_age.is_none());
        assert!(stats.average_age_hours().is_none());
    }

    #[test]
    fn test_hit_rate() {
        let stats = BackendStats {
            hits: 3,
            misses: 1,
            ..BackendStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(BackendStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_invalidation_from_parts() {
        let keys = vec![CacheKey::new("a|x")];
        let pattern = KeyPattern::glob("a|*").unwrap();

        assert!(matches!(
            Invalidation::from_parts(Some(keys.clone()), Some(pattern.clone())),
            Invalidation::Keys(_)
        ));
        assert!(matches!(
            Invalidation::from_parts(None, Some(pattern)),
            Invalidation::Pattern(_)
        ));
        assert!(matches!(Invalidation::from_parts(None, None), Invalidation::All));

        let by_keys = Invalidation::Keys(keys);
        assert!(by_keys.matches(&CacheKey::new("a|x")));
        assert!(!by_keys.matches(&CacheKey::new("a|y")));
    }
}
