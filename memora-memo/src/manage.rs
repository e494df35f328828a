//! Per-entity cache management.
//!
//! Every [`CacheOwner`] gets [`CacheManagement`] for free. Operations are
//! scoped to the keys the owner's identity produced, even when the backend
//! is shared with other entities. The infallible forms log and return
//! zero/empty/default on any internal error so monitoring loops never fail.

use async_trait::async_trait;
use memora_core::{CacheKey, EntityIdentity, MemoraResult};
use memora_storage::{BackendStats, CachedKeyInfo, Invalidation, KeyPattern};
use tracing::{debug, warn};

use crate::owner::CacheOwner;

/// Cache statistics for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCacheStats {
    pub entity: EntityIdentity,
    /// Backend variant name, `None` when caching is disabled.
    pub cache_backend: Option<String>,
    /// Entries whose key belongs to this entity.
    pub entity_entries: usize,
    /// Statistics for the whole backend.
    pub global: Option<BackendStats>,
}

/// Whether `key` is selected by an entry of a `keys` filter: either the
/// method name (key prefix) or the full key.
fn key_selected(key: &CacheKey, selectors: &[&str]) -> bool {
    selectors
        .iter()
        .any(|s| key.method_prefix() == *s || key.as_str() == *s)
}

#[async_trait]
pub trait CacheManagement: CacheOwner {
    /// Statistics for this entity and its backend.
    async fn get_cache_stats(&self) -> EntityCacheStats;

    /// Keys cached for this entity, least recently used first.
    async fn list_cached_keys(&self) -> Vec<CachedKeyInfo>;

    /// Remove this entity's entries selected by `keys` (method names or
    /// exact keys) or `pattern` (a glob over the full key). `keys` wins when
    /// both are given; with neither, every entry of this entity is removed.
    async fn try_invalidate_cache(
        &self,
        keys: Option<&[&str]>,
        pattern: Option<&str>,
    ) -> MemoraResult<usize>;

    /// [`CacheManagement::try_invalidate_cache`], returning 0 on error.
    async fn invalidate_cache(&self, keys: Option<&[&str]>, pattern: Option<&str>) -> usize;
}

#[async_trait]
impl<T: CacheOwner + ?Sized> CacheManagement for T {
    async fn get_cache_stats(&self) -> EntityCacheStats {
        let entity = self.cache_identity().clone();
        let Some(backend) = self.cache_backend() else {
            return EntityCacheStats {
                entity,
                cache_backend: None,
                entity_entries: 0,
                global: None,
            };
        };

        let entity_entries = match backend.list_keys().await {
            Ok(keys) => keys.iter().filter(|i| i.key.belongs_to(&entity)).count(),
            Err(e) => {
                warn!(entity = %entity, error = %e, "cannot list cache keys");
                0
            }
        };
        let global = match backend.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(entity = %entity, error = %e, "cannot read cache stats");
                None
            }
        };

        EntityCacheStats {
            entity,
            cache_backend: Some(backend.name().to_string()),
            entity_entries,
            global,
        }
    }

    async fn list_cached_keys(&self) -> Vec<CachedKeyInfo> {
        let Some(backend) = self.cache_backend() else {
            return Vec::new();
        };
        let identity = self.cache_identity();
        match backend.list_keys().await {
            Ok(keys) => keys.into_iter().filter(|i| i.key.belongs_to(identity)).collect(),
            Err(e) => {
                warn!(entity = %identity, error = %e, "cannot list cache keys");
                Vec::new()
            }
        }
    }

    async fn try_invalidate_cache(
        &self,
        keys: Option<&[&str]>,
        pattern: Option<&str>,
    ) -> MemoraResult<usize> {
        let Some(backend) = self.cache_backend() else {
            return Ok(0);
        };
        let identity = self.cache_identity();

        let pattern = match (keys, pattern) {
            (None, Some(glob)) => Some(KeyPattern::glob(glob)?),
            _ => None,
        };

        let selected: Vec<CacheKey> = backend
            .list_keys()
            .await?
            .into_iter()
            .map(|info| info.key)
            .filter(|key| key.belongs_to(identity))
            .filter(|key| match (keys, &pattern) {
                (Some(selectors), _) => key_selected(key, selectors),
                (None, Some(pattern)) => pattern.matches(key.as_str()),
                (None, None) => true,
            })
            .collect();

        if selected.is_empty() {
            return Ok(0);
        }
        let removed = backend.invalidate(&Invalidation::Keys(selected)).await?;
        debug!(entity = %identity, removed, "entity cache invalidated");
        Ok(removed)
    }

    async fn invalidate_cache(&self, keys: Option<&[&str]>, pattern: Option<&str>) -> usize {
        match self.try_invalidate_cache(keys, pattern).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(entity = %self.cache_identity(), error = %e, "cache invalidation failed");
                0
            }
        }
    }
}
