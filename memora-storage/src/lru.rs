//! Least-recently-used ordering policy.
//!
//! [`LruStore`] pairs the entry map with a [`RecencyOrder`]. After every
//! mutation the two hold exactly the same key set and the store holds at most
//! `max_keys` entries. Callers serialize access with a single mutex; nothing
//! here is thread-safe on its own.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use memora_core::{CacheEntry, CacheKey, CacheValue};

use crate::traits::{BackendStats, CachedKeyInfo, Invalidation};

/// Recency list: oldest key at the front, newest at the back, no duplicates.
#[derive(Debug, Clone, Default)]
pub struct RecencyOrder {
    keys: VecDeque<CacheKey>,
}

impl RecencyOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.contains(key)
    }

    /// Move `key` to the most-recently-used end, inserting it if absent.
    pub fn touch(&mut self, key: &CacheKey) {
        self.remove(key);
        self.keys.push_back(key.clone());
    }

    /// Drop `key` from the order. Returns whether it was present.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(index) => {
                self.keys.remove(index);
                true
            }
            None => false,
        }
    }

    /// Take the least-recently-used key.
    pub fn pop_oldest(&mut self) -> Option<CacheKey> {
        self.keys.pop_front()
    }

    /// Keys from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.keys.iter()
    }

    pub fn retain<F: FnMut(&CacheKey) -> bool>(&mut self, f: F) {
        self.keys.retain(f);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Replace the order wholesale, dropping duplicates (first occurrence wins).
    pub fn replace<I: IntoIterator<Item = CacheKey>>(&mut self, keys: I) {
        self.keys.clear();
        for key in keys {
            if !self.keys.contains(&key) {
                self.keys.push_back(key);
            }
        }
    }
}

/// Entry map plus recency order under one bound.
#[derive(Debug, Clone)]
pub struct LruStore {
    entries: HashMap<CacheKey, CacheEntry>,
    order: RecencyOrder,
    max_keys: usize,
}

impl LruStore {
    pub fn new(max_keys: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: RecencyOrder::new(),
            max_keys,
        }
    }

    /// Rebuild a store from a persisted map and key list.
    ///
    /// Keys listed without an entry are dropped. Entries missing from the
    /// list are treated as least recently used, ordered by timestamp. The
    /// oldest entries are then evicted until the bound holds. Returns the
    /// store and the number of entries dropped to respect the bound.
    pub fn restore(
        max_keys: usize,
        mut entries: HashMap<CacheKey, CacheEntry>,
        key_list: Vec<CacheKey>,
    ) -> (Self, usize) {
        let mut listed = RecencyOrder::new();
        listed.replace(key_list.into_iter().filter(|k| entries.contains_key(k)));

        let mut unlisted: Vec<(CacheKey, DateTime<Utc>)> = entries
            .iter()
            .filter(|(k, _)| !listed.contains(k))
            .map(|(k, e)| (k.clone(), e.cached_at()))
            .collect();
        unlisted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut order = RecencyOrder::new();
        order.replace(
            unlisted
                .into_iter()
                .map(|(k, _)| k)
                .chain(listed.iter().cloned()),
        );

        let mut dropped = 0;
        while order.len() > max_keys {
            if let Some(oldest) = order.pop_oldest() {
                entries.remove(&oldest);
                dropped += 1;
            }
        }

        (
            Self {
                entries,
                order,
                max_keys,
            },
            dropped,
        )
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn order_len(&self) -> usize {
        self.order.len()
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.clone();
        self.order.touch(key);
        Some(entry)
    }

    /// Look up `key` without reordering.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite `key` as the newest entry. Returns the keys evicted
    /// to respect the bound.
    pub fn insert(&mut self, key: CacheKey, value: CacheValue) -> Vec<CacheKey> {
        self.insert_entry(key, CacheEntry::new(value))
    }

    pub fn insert_entry(&mut self, key: CacheKey, entry: CacheEntry) -> Vec<CacheKey> {
        self.order.touch(&key);
        self.entries.insert(key, entry);

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_keys {
            match self.pop_oldest() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    /// Remove up to `count` of the oldest entries.
    pub fn evict(&mut self, count: usize) -> Vec<CacheKey> {
        let mut evicted = Vec::with_capacity(count.min(self.entries.len()));
        for _ in 0..count {
            match self.pop_oldest() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.order.remove(key);
        self.entries.remove(key)
    }

    /// Remove `key` only if its entry still carries `cached_at`.
    pub fn remove_if_unchanged(&mut self, key: &CacheKey, cached_at: DateTime<Utc>) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.cached_at() == cached_at => {
                self.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Remove every entry selected by `scope`.
    pub fn invalidate(&mut self, scope: &Invalidation) -> usize {
        match scope {
            Invalidation::All => {
                let removed = self.entries.len();
                self.entries.clear();
                self.order.clear();
                removed
            }
            Invalidation::Keys(keys) => keys.iter().filter(|k| self.remove(k).is_some()).count(),
            Invalidation::Pattern(_) => {
                let doomed: Vec<CacheKey> = self
                    .order
                    .iter()
                    .filter(|k| scope.matches(k))
                    .cloned()
                    .collect();
                for key in &doomed {
                    self.remove(key);
                }
                doomed.len()
            }
        }
    }

    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let oldest = self.order.pop_oldest()?;
        self.entries.remove(&oldest);
        Some(oldest)
    }

    /// Keys oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.iter()
    }

    /// Clone of `(key, entry)` pairs in recency order.
    pub fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k.clone(), e.clone())))
            .collect()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> BackendStats {
        BackendStats::from_timestamps(
            self.entries.values().map(CacheEntry::cached_at),
            self.max_keys,
            now,
        )
    }

    pub fn list_keys(&self, now: DateTime<Utc>) -> Vec<CachedKeyInfo> {
        self.order
            .iter()
            .filter_map(|k| {
                self.entries
                    .get(k)
                    .map(|e| CachedKeyInfo::from_entry(k.clone(), e, now))
            })
            .collect()
    }

    /// Whether the map and the order agree and the bound holds.
    pub fn is_consistent(&self) -> bool {
        self.entries.len() == self.order.len()
            && self.order.iter().all(|k| self.entries.contains_key(k))
            && self.entries.len() <= self.max_keys
    }
}
