//! MEMORA Storage - Cache Backends
//!
//! The [`CacheBackend`] trait and its three variants:
//!
//! - [`MemoryCacheBackend`]: bounded in-process LRU map
//! - [`DiskCacheBackend`]: the same, persisted as a gzip JSON snapshot
//! - [`RemoteCacheBackend`]: entries in an external key-value store
//!   ([`RedisStore`] behind the `redis` feature, or [`InMemoryRemoteStore`])
//!
//! plus the LRU ordering policy, the value codec and key patterns used by
//! bulk invalidation.

pub mod codec;
pub mod disk;
pub mod factory;
pub mod lru;
pub mod memory;
pub mod pattern;
pub mod remote;
pub mod traits;

pub use codec::{CodecError, TABLE_MARKER};
pub use disk::{DiskCacheBackend, SaveReport};
pub use factory::open_backend;
pub use lru::{LruStore, RecencyOrder};
pub use memory::{IntegrityReport, MemoryCacheBackend};
pub use pattern::KeyPattern;
#[cfg(feature = "redis")]
pub use remote::RedisStore;
pub use remote::{InMemoryRemoteStore, RemoteCacheBackend, RemoteStore};
pub use traits::{BackendStats, CacheBackend, CachedKeyInfo, Invalidation};
