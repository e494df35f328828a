//! Disk-persisted cache backend.
//!
//! Entries live in memory exactly as in [`MemoryCacheBackend`]; the disk file
//! is a gzip JSON snapshot (see [`crate::codec`]) loaded once on open and
//! rewritten by [`DiskCacheBackend::save`].
//!
//! # Saving
//!
//! `save` clones the entries under the store lock, releases it, encodes, then
//! writes a temporary file next to the target and renames it into place.
//! Concurrent saves are serialized by a separate async mutex, so the store
//! lock is never held during I/O. Entries that fail to encode are removed
//! from memory (unless rewritten since the snapshot) and reported as dropped.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memora_core::{CacheEntry, CacheError, CacheKey, CacheValue, MemoraResult};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::codec::{self, DecodedSnapshot};
use crate::lru::LruStore;
use crate::memory::MemoryCacheBackend;
use crate::traits::{BackendStats, CacheBackend, CachedKeyInfo, Invalidation};

/// Outcome of a [`DiskCacheBackend::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Entries written to disk.
    pub saved: usize,
    /// Entries that could not be serialized and were removed.
    pub dropped: usize,
}

/// LRU cache persisted to a single snapshot file.
///
/// One instance per path. Two instances sharing a file overwrite each other.
#[derive(Debug)]
pub struct DiskCacheBackend {
    inner: MemoryCacheBackend,
    path: PathBuf,
    persist_on_write: bool,
    save_lock: AsyncMutex<()>,
}

impl DiskCacheBackend {
    /// Open the cache at `path`, loading any existing snapshot.
    ///
    /// Never fails: a missing, empty or unreadable file yields an empty cache.
    pub fn open(path: impl Into<PathBuf>, max_keys: usize) -> Self {
        let path = path.into();
        let store = load_store(&path, max_keys);
        Self {
            inner: MemoryCacheBackend::from_store(store),
            path,
            persist_on_write: true,
            save_lock: AsyncMutex::new(()),
        }
    }

    /// Whether mutating operations save immediately (default: true).
    pub fn with_persist_on_write(mut self, persist: bool) -> Self {
        self.persist_on_write = persist;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persist_on_write(&self) -> bool {
        self.persist_on_write
    }

    /// Write the current entries to disk.
    ///
    /// Fails only on file I/O. Entries that cannot be serialized are dropped
    /// from the cache and counted in [`SaveReport::dropped`].
    pub async fn save(&self) -> MemoraResult<SaveReport> {
        let _serialized = self.save_lock.lock().await;

        let snapshot = self.inner.lock()?.snapshot();
        let encoded = codec::encode_snapshot(&snapshot)?;

        let mut dropped = 0;
        if !encoded.failed.is_empty() {
            let stamps: HashMap<&CacheKey, DateTime<Utc>> = snapshot
                .iter()
                .map(|(k, e)| (k, e.cached_at()))
                .collect();
            let mut store = self.inner.lock()?;
            for (key, err) in &encoded.failed {
                warn!(key = %key, error = %err, "dropping entry that cannot be serialized");
                if let Some(cached_at) = stamps.get(key) {
                    if store.remove_if_unchanged(key, *cached_at) {
                        dropped += 1;
                    }
                }
            }
        }

        write_atomically(&self.path, &encoded.bytes).await?;

        info!(
            path = %self.path.display(),
            saved = encoded.saved,
            dropped,
            "cache snapshot saved"
        );
        Ok(SaveReport {
            saved: encoded.saved,
            dropped,
        })
    }

    async fn persist(&self) -> MemoraResult<()> {
        if self.persist_on_write {
            self.save().await?;
        }
        Ok(())
    }
}

fn load_store(path: &Path, max_keys: usize) -> LruStore {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cache snapshot, starting empty");
            return LruStore::new(max_keys);
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read cache snapshot, starting empty");
            return LruStore::new(max_keys);
        }
    };

    if bytes.is_empty() {
        return LruStore::new(max_keys);
    }

    let DecodedSnapshot {
        entries,
        key_list,
        skipped,
    } = match codec::decode_snapshot(&bytes) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache snapshot, starting empty");
            return LruStore::new(max_keys);
        }
    };

    for (key, err) in &skipped {
        warn!(key = %key, error = %err, "skipping unreadable cache entry");
    }

    let (store, trimmed) = LruStore::restore(max_keys, entries, key_list);
    info!(
        path = %path.display(),
        loaded = store.len(),
        skipped = skipped.len(),
        trimmed,
        "cache snapshot loaded"
    );
    store
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let io_err = |e: std::io::Error| CacheError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "cache".into());
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)
}

#[async_trait]
impl CacheBackend for DiskCacheBackend {
    fn name(&self) -> &str {
        "disk"
    }

    fn max_keys(&self) -> usize {
        self.inner.max_keys()
    }

    async fn get(&self, key: &CacheKey) -> MemoraResult<Option<CacheEntry>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: CacheValue) -> MemoraResult<()> {
        self.inner.set(key, value).await?;
        self.persist().await
    }

    async fn exists(&self, key: &CacheKey) -> MemoraResult<bool> {
        self.inner.exists(key).await
    }

    async fn evict(&self, count: usize) -> MemoraResult<usize> {
        let evicted = self.inner.evict(count).await?;
        if evicted > 0 {
            self.persist().await?;
        }
        Ok(evicted)
    }

    async fn invalidate(&self, scope: &Invalidation) -> MemoraResult<usize> {
        let removed = self.inner.invalidate(scope).await?;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn stats(&self) -> MemoraResult<BackendStats> {
        self.inner.stats().await
    }

    async fn list_keys(&self) -> MemoraResult<Vec<CachedKeyInfo>> {
        self.inner.list_keys().await
    }

    async fn cache_info(&self, key: &CacheKey) -> MemoraResult<Option<CachedKeyInfo>> {
        self.inner.cache_info(key).await
    }
}
