//! Cache management across many entities.
//!
//! A [`ProjectCache`] groups owners that usually share one backend (all the
//! repositories of a project directory, for example) and aggregates their
//! statistics and invalidation results.

use std::collections::BTreeMap;

use memora_core::{CallArgs, EntityIdentity};
use memora_storage::BackendStats;
use tracing::{info, warn};

use crate::manage::CacheManagement;
use crate::owner::CacheOwner;
use crate::registry::{BulkWarmReport, MethodRegistry};

/// Aggregated cache statistics for a project.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectCacheStats {
    pub total_entities: usize,
    pub entities_with_cache: usize,
    pub cache_coverage_percent: f64,
    /// Sum of per-entity entry counts.
    pub total_cache_entries: usize,
    /// Backend variant name to number of entities using it.
    pub cache_backends: BTreeMap<String, usize>,
    /// Statistics of the first backend seen, when there is one.
    pub global: Option<BackendStats>,
}

/// Per-entity outcome of a bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInvalidation {
    pub success: bool,
    pub invalidated: usize,
    pub error: Option<String>,
}

/// Outcome of [`ProjectCache::invalidate_cache`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkInvalidation {
    pub entities_processed: usize,
    pub total_invalidated: usize,
    /// Keyed by entity identity.
    pub results: BTreeMap<String, EntityInvalidation>,
}

/// A set of cache owners managed together.
#[derive(Debug, Clone)]
pub struct ProjectCache<O> {
    owners: Vec<O>,
}

impl<O: CacheOwner> ProjectCache<O> {
    pub fn new(owners: Vec<O>) -> Self {
        Self { owners }
    }

    pub fn owners(&self) -> &[O] {
        &self.owners
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub async fn get_cache_stats(&self) -> ProjectCacheStats {
        let mut stats = ProjectCacheStats {
            total_entities: self.owners.len(),
            ..ProjectCacheStats::default()
        };

        for owner in &self.owners {
            let entity = owner.get_cache_stats().await;
            let Some(backend) = entity.cache_backend else {
                continue;
            };
            stats.entities_with_cache += 1;
            stats.total_cache_entries += entity.entity_entries;
            *stats.cache_backends.entry(backend).or_insert(0) += 1;
            if stats.global.is_none() {
                stats.global = entity.global;
            }
        }

        if stats.total_entities > 0 {
            stats.cache_coverage_percent =
                stats.entities_with_cache as f64 / stats.total_entities as f64 * 100.0;
        }
        stats
    }

    /// Invalidate across owners.
    ///
    /// `entities` restricts the owners processed; each filter entry matches
    /// an owner's full identity or its [`EntityIdentity::name`]. `keys` and
    /// `pattern` apply per owner as in [`CacheManagement::invalidate_cache`].
    pub async fn invalidate_cache(
        &self,
        keys: Option<&[&str]>,
        pattern: Option<&str>,
        entities: Option<&[&str]>,
    ) -> BulkInvalidation {
        let mut result = BulkInvalidation::default();

        for owner in self.owners.iter().filter(|o| selected(o.cache_identity(), entities)) {
            let identity = owner.cache_identity();
            result.entities_processed += 1;
            let outcome = match owner.try_invalidate_cache(keys, pattern).await {
                Ok(invalidated) => {
                    result.total_invalidated += invalidated;
                    EntityInvalidation {
                        success: true,
                        invalidated,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(entity = %identity, error = %e, "entity invalidation failed");
                    EntityInvalidation {
                        success: false,
                        invalidated: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            result.results.insert(identity.to_string(), outcome);
        }

        info!(
            entities = result.entities_processed,
            invalidated = result.total_invalidated,
            "project cache invalidated"
        );
        result
    }

    /// Warm every owner's cache concurrently through `registry`.
    pub async fn warm_cache(
        &self,
        registry: &MethodRegistry<O>,
        methods: Option<&[&str]>,
        args: &CallArgs,
    ) -> BulkWarmReport {
        registry.bulk_warm(self.owners.as_slice(), methods, args).await
    }
}

fn selected(identity: &EntityIdentity, filter: Option<&[&str]>) -> bool {
    match filter {
        None => true,
        Some(names) => names
            .iter()
            .any(|n| *n == identity.as_str() || *n == identity.name()),
    }
}
