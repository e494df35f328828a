//! MEMORA Memo - Memoization and Cache Management
//!
//! The layer analytics code talks to:
//!
//! - [`Memoized`]: read-through caching around a [`Computation`]
//! - [`CacheManagement`]: per-entity stats and invalidation for any
//!   [`CacheOwner`]
//! - [`MethodRegistry`]: named methods and cache warming
//! - [`ProjectCache`]: the same operations across many owners
//!
//! Backends, keys and values come from `memora-storage` and `memora-core`
//! and are re-exported here for convenience.

pub mod manage;
pub mod memoized;
pub mod owner;
pub mod project;
pub mod registry;

pub use manage::{CacheManagement, EntityCacheStats};
pub use memoized::{from_fn, Computation, FnComputation, MemoRead, MemoSource, Memoized};
pub use owner::{CacheOwner, EntityCache};
pub use project::{BulkInvalidation, EntityInvalidation, ProjectCache, ProjectCacheStats};
pub use registry::{
    BulkWarmReport, MethodRegistry, WarmFailure, WarmFailureReason, WarmMethod, WarmReport,
};

pub use memora_core::{
    init_tracing, ArgValue, CacheConfig, CacheKey, CacheValue, CallArgs, EntityIdentity, KeySpec,
    MemoraError, MemoraResult, Table, TelemetryConfig,
};
pub use memora_storage::{open_backend, BackendStats, CacheBackend};
