//! The memoization wrapper.
//!
//! [`Memoized`] pairs a [`KeySpec`] with a [`Computation`]. Calling it
//! derives a key from the owner's identity and the call arguments, serves a
//! cached value when one exists, and otherwise computes and stores.
//!
//! Cache failures never reach the caller: an unreadable entry or an
//! unreachable backend degrades to computing directly, and a failed write
//! still returns the computed value. Only the computation's own error
//! propagates, unchanged.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use memora_core::{CacheKey, CacheValue, CallArgs, KeySpec, Timestamp};
use tracing::{debug, warn};

use crate::owner::CacheOwner;

/// An expensive, side-effect-free computation over an owner.
#[async_trait]
pub trait Computation<O: ?Sized>: Send + Sync {
    type Error: Send;

    async fn compute(&self, owner: &O, args: &CallArgs) -> Result<CacheValue, Self::Error>;
}

/// Adapts a synchronous closure into a [`Computation`].
pub struct FnComputation<F, E> {
    f: F,
    _error: PhantomData<fn() -> E>,
}

/// Wrap `f` as a computation.
pub fn from_fn<O, F, E>(f: F) -> FnComputation<F, E>
where
    O: ?Sized,
    F: Fn(&O, &CallArgs) -> Result<CacheValue, E> + Send + Sync,
{
    FnComputation {
        f,
        _error: PhantomData,
    }
}

#[async_trait]
impl<O, F, E> Computation<O> for FnComputation<F, E>
where
    O: Sync + ?Sized,
    F: Fn(&O, &CallArgs) -> Result<CacheValue, E> + Send + Sync,
    E: Send,
{
    type Error = E;

    async fn compute(&self, owner: &O, args: &CallArgs) -> Result<CacheValue, E> {
        (self.f)(owner, args)
    }
}

/// Where a memoized result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoSource {
    /// Served from the cache; the value was stored at `cached_at`.
    Cache { cached_at: Timestamp },
    /// Computed on this call and handed to the backend.
    Computed,
    /// Computed without touching the cache (no backend, or skipped).
    Uncached,
}

/// A memoized result with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoRead {
    pub value: CacheValue,
    pub source: MemoSource,
}

impl MemoRead {
    pub fn is_cached(&self) -> bool {
        matches!(self.source, MemoSource::Cache { .. })
    }

    /// When the served value was stored, if it came from the cache.
    pub fn cached_at(&self) -> Option<Timestamp> {
        match self.source {
            MemoSource::Cache { cached_at } => Some(cached_at),
            _ => None,
        }
    }
}

type SkipPredicate = Box<dyn Fn(&CallArgs) -> bool + Send + Sync>;

/// A computation wrapped with read-through caching.
///
/// # Example
///
/// ```ignore
/// let spec = KeySpec::new("commit_history", ["branch", "limit"])?;
/// let history = Memoized::new(spec, from_fn(|repo: &Repo, args| repo.history(args)))
///     .skip_if(|args| args.get("limit").is_none());
///
/// let value = history.call(&repo, &CallArgs::new().with("branch", "main")).await?;
/// ```
pub struct Memoized<C> {
    spec: KeySpec,
    computation: C,
    skip_if: Option<SkipPredicate>,
}

impl<C> Memoized<C> {
    pub fn new(spec: KeySpec, computation: C) -> Self {
        Self {
            spec,
            computation,
            skip_if: None,
        }
    }

    /// Bypass the cache entirely (no read, no write) for calls matching
    /// `predicate`.
    pub fn skip_if(mut self, predicate: impl Fn(&CallArgs) -> bool + Send + Sync + 'static) -> Self {
        self.skip_if = Some(Box::new(predicate));
        self
    }

    /// The method name, which is also the key prefix.
    pub fn name(&self) -> &str {
        self.spec.prefix()
    }

    pub fn spec(&self) -> &KeySpec {
        &self.spec
    }

    /// The key a call with `args` on `owner` reads and writes.
    pub fn key_for<O: CacheOwner + ?Sized>(&self, owner: &O, args: &CallArgs) -> CacheKey {
        self.spec.derive(owner.cache_identity(), args)
    }

    fn skips(&self, args: &CallArgs) -> bool {
        self.skip_if.as_ref().is_some_and(|predicate| predicate(args))
    }

    /// Run the call, serving from the cache when possible.
    pub async fn call<O>(&self, owner: &O, args: &CallArgs) -> Result<CacheValue, C::Error>
    where
        O: CacheOwner + ?Sized,
        C: Computation<O>,
    {
        Ok(self.call_traced(owner, args).await?.value)
    }

    /// Like [`Memoized::call`], also reporting where the value came from.
    pub async fn call_traced<O>(&self, owner: &O, args: &CallArgs) -> Result<MemoRead, C::Error>
    where
        O: CacheOwner + ?Sized,
        C: Computation<O>,
    {
        let method = self.name();

        let Some(backend) = owner.cache_backend() else {
            let value = self.computation.compute(owner, args).await?;
            return Ok(MemoRead {
                value,
                source: MemoSource::Uncached,
            });
        };

        if self.skips(args) {
            debug!(method, "cache skipped for this call");
            let value = self.computation.compute(owner, args).await?;
            return Ok(MemoRead {
                value,
                source: MemoSource::Uncached,
            });
        }

        let key = self.key_for(owner, args);

        if args.is_force_refresh() {
            debug!(method, key = %key, "forced refresh, bypassing cache read");
        } else {
            match backend.get(&key).await {
                Ok(Some(entry)) => {
                    debug!(method, key = %key, "cache hit");
                    let cached_at = entry.cached_at();
                    return Ok(MemoRead {
                        value: entry.into_value(),
                        source: MemoSource::Cache { cached_at },
                    });
                }
                Ok(None) => debug!(method, key = %key, "cache miss"),
                Err(e) => warn!(
                    method,
                    key = %key,
                    backend = backend.name(),
                    error = %e,
                    "cache read failed, computing directly"
                ),
            }
        }

        let value = self.computation.compute(owner, args).await?;

        if let Err(e) = backend.set(&key, value.clone()).await {
            warn!(
                method,
                key = %key,
                backend = backend.name(),
                error = %e,
                "cache write failed, returning computed value"
            );
        }

        Ok(MemoRead {
            value,
            source: MemoSource::Computed,
        })
    }
}

impl<C> fmt::Debug for Memoized<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("spec", &self.spec)
            .field("skip_if", &self.skip_if.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::EntityCache;
    use memora_storage::{CacheBackend, MemoryCacheBackend};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Computation<EntityCache> for Counting {
        type Error = Infallible;

        async fn compute(&self, _owner: &EntityCache, args: &CallArgs) -> Result<CacheValue, Infallible> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
            let limit = match args.get("limit") {
                Some(memora_core::ArgValue::Int(l)) => *l,
                _ => 0,
            };
            Ok(CacheValue::Int(n * 1000 + limit))
        }
    }

    fn memoized() -> Memoized<Counting> {
        let spec = KeySpec::new("history", ["limit"]).unwrap();
        Memoized::new(
            spec,
            Counting {
                calls: AtomicUsize::new(0),
            },
        )
    }

    fn owner() -> (EntityCache, Arc<MemoryCacheBackend>) {
        let backend = Arc::new(MemoryCacheBackend::new(10));
        (EntityCache::new("/repo", backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let (owner, _) = owner();
        let m = memoized();
        let args = CallArgs::new().with("limit", 5);

        let first = m.call_traced(&owner, &args).await.unwrap();
        let second = m.call_traced(&owner, &args).await.unwrap();

        assert_eq!(first.source, MemoSource::Computed);
        assert!(second.is_cached());
        assert_eq!(first.value, second.value);
        assert_eq!(m.computation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_recomputes_and_overwrites() {
        let (owner, backend) = owner();
        let m = memoized();
        let args = CallArgs::new().with("limit", 5);

        m.call(&owner, &args).await.unwrap();
        let refreshed = m.call(&owner, &args.clone().force_refresh(true)).await.unwrap();
        assert_eq!(refreshed, CacheValue::Int(1005));

        let stored = backend.get(&m.key_for(&owner, &args)).await.unwrap().unwrap();
        assert_eq!(stored.value(), &CacheValue::Int(1005));
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_skip_if_leaves_no_entry() {
        let (owner, backend) = owner();
        let m = memoized().skip_if(|args| args.get("limit").is_none());

        let read = m.call_traced(&owner, &CallArgs::new()).await.unwrap();
        assert_eq!(read.source, MemoSource::Uncached);
        assert!(backend.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_no_backend_computes_every_time() {
        let owner = EntityCache::uncached("/repo");
        let m = memoized();
        m.call(&owner, &CallArgs::new()).await.unwrap();
        let read = m.call_traced(&owner, &CallArgs::new()).await.unwrap();
        assert_eq!(read.source, MemoSource::Uncached);
        assert_eq!(read.cached_at(), None);
        assert_eq!(m.computation.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_computation_error_propagates_and_is_not_cached() {
        let (owner, backend) = owner();
        let spec = KeySpec::new("broken", Vec::<String>::new()).unwrap();
        let m = Memoized::new(
            spec,
            from_fn(|_: &EntityCache, _: &CallArgs| Err::<CacheValue, _>("git exploded")),
        );

        let err = m.call(&owner, &CallArgs::new()).await.unwrap_err();
        assert_eq!(err, "git exploded");
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn test_debug_omits_computation() {
        let m = memoized().skip_if(|_| false);
        let debug = format!("{:?}", m);
        assert!(debug.contains("history"));
        assert!(debug.contains("skip_if: true"));
    }
}
