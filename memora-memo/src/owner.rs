//! Entities that own a cache namespace.

use std::fmt;
use std::sync::Arc;

use memora_core::EntityIdentity;
use memora_storage::CacheBackend;

/// Something whose method results are memoized.
///
/// The identity scopes every key the owner's methods produce; two owners
/// with the same identity share cached results when they share a backend.
/// An owner without a backend computes every call directly.
pub trait CacheOwner: Send + Sync {
    fn cache_identity(&self) -> &EntityIdentity;

    fn cache_backend(&self) -> Option<Arc<dyn CacheBackend>>;
}

impl<T: CacheOwner + ?Sized> CacheOwner for Arc<T> {
    fn cache_identity(&self) -> &EntityIdentity {
        (**self).cache_identity()
    }

    fn cache_backend(&self) -> Option<Arc<dyn CacheBackend>> {
        (**self).cache_backend()
    }
}

/// Minimal owner: an identity plus an optional backend.
#[derive(Clone)]
pub struct EntityCache {
    identity: EntityIdentity,
    backend: Option<Arc<dyn CacheBackend>>,
}

impl EntityCache {
    pub fn new(identity: impl Into<EntityIdentity>, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            identity: identity.into(),
            backend: Some(backend),
        }
    }

    /// An owner with caching disabled.
    pub fn uncached(identity: impl Into<EntityIdentity>) -> Self {
        Self {
            identity: identity.into(),
            backend: None,
        }
    }

    pub fn identity(&self) -> &EntityIdentity {
        &self.identity
    }
}

impl fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("identity", &self.identity)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

impl CacheOwner for EntityCache {
    fn cache_identity(&self) -> &EntityIdentity {
        &self.identity
    }

    fn cache_backend(&self) -> Option<Arc<dyn CacheBackend>> {
        self.backend.clone()
    }
}
