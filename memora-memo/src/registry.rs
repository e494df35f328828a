//! Named memoized methods and cache warming.
//!
//! A [`MethodRegistry`] lists the memoized methods an owner type exposes,
//! each with default arguments. Warming calls every requested method through
//! its wrapper so later calls are served from the cache. Unknown method
//! names and failed computations are reported in the result, never raised.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use memora_core::{CallArgs, ConfigError};
use tracing::{debug, info, warn};

use crate::manage::CacheManagement;
use crate::memoized::{Computation, MemoSource, Memoized};
use crate::owner::CacheOwner;

/// A memoized method with its concrete computation erased.
#[async_trait]
pub trait WarmMethod<O: ?Sized>: Send + Sync {
    fn name(&self) -> &str;

    /// Call through the cache. Failures are rendered to text.
    async fn warm(&self, owner: &O, args: &CallArgs) -> Result<MemoSource, String>;
}

#[async_trait]
impl<O, C> WarmMethod<O> for Memoized<C>
where
    O: CacheOwner + ?Sized,
    C: Computation<O>,
    C::Error: fmt::Display,
{
    fn name(&self) -> &str {
        Memoized::name(self)
    }

    async fn warm(&self, owner: &O, args: &CallArgs) -> Result<MemoSource, String> {
        self.call_traced(owner, args)
            .await
            .map(|read| read.source)
            .map_err(|e| e.to_string())
    }
}

/// Why a method could not be warmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmFailureReason {
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmFailure {
    pub method: String,
    pub reason: WarmFailureReason,
}

impl fmt::Display for WarmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            WarmFailureReason::NotFound => write!(
                f,
                "{}",
                ConfigError::UnknownMethod {
                    method: self.method.clone()
                }
            ),
            WarmFailureReason::Failed(msg) => write!(f, "Method '{}' failed: {}", self.method, msg),
        }
    }
}

/// Outcome of warming one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmReport {
    /// Methods that ran to completion, in execution order.
    pub methods_executed: Vec<String>,
    pub failures: Vec<WarmFailure>,
    /// Growth of the owner's entry count. Approximate when other writers
    /// or evictions touch the backend concurrently.
    pub cache_entries_created: usize,
    pub execution_time: Duration,
    /// True when nothing failed or at least one method ran.
    pub success: bool,
}

impl WarmReport {
    fn empty(started: Instant) -> Self {
        Self {
            methods_executed: Vec::new(),
            failures: Vec::new(),
            cache_entries_created: 0,
            execution_time: started.elapsed(),
            success: true,
        }
    }

    pub fn methods_failed(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.method.as_str()).collect()
    }

    /// Human-readable error messages, one per failure.
    pub fn errors(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }
}

/// Outcome of warming many owners.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWarmReport {
    pub entities_processed: usize,
    /// Per-entity reports keyed by identity.
    pub results: BTreeMap<String, WarmReport>,
    pub successful: usize,
    pub failed: usize,
    pub total_cache_entries_created: usize,
    pub execution_time: Duration,
}

impl BulkWarmReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

struct Registered<O: ?Sized> {
    method: Arc<dyn WarmMethod<O>>,
    defaults: CallArgs,
}

/// Memoized methods of an owner type, in registration order.
pub struct MethodRegistry<O: ?Sized> {
    methods: Vec<Registered<O>>,
    index: HashMap<String, usize>,
}

impl<O: CacheOwner + ?Sized> MethodRegistry<O> {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a method. Names must be unique.
    pub fn register<M>(&mut self, method: M, defaults: CallArgs) -> Result<&mut Self, ConfigError>
    where
        M: WarmMethod<O> + 'static,
    {
        let name = method.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ConfigError::InvalidValue {
                field: "method".to_string(),
                value: name,
                reason: "registered twice".to_string(),
            });
        }
        self.index.insert(name, self.methods.len());
        self.methods.push(Registered {
            method: Arc::new(method),
            defaults,
        });
        Ok(self)
    }

    /// Registered method names, in warm order.
    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(|r| r.method.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Pre-populate `owner`'s cache.
    ///
    /// `methods` defaults to every registered method. Each method runs with
    /// its defaults overridden by `args`. With no backend this is a
    /// successful no-op.
    pub async fn warm_cache(
        &self,
        owner: &O,
        methods: Option<&[&str]>,
        args: &CallArgs,
    ) -> WarmReport {
        let started = Instant::now();
        let identity = owner.cache_identity();

        if owner.cache_backend().is_none() {
            debug!(entity = %identity, "no cache backend, nothing to warm");
            return WarmReport::empty(started);
        }

        let requested: Vec<&str> = match methods {
            Some(names) => names.to_vec(),
            None => self.names(),
        };

        let entries_before = owner.list_cached_keys().await.len();
        let mut report = WarmReport::empty(started);

        for name in requested {
            let Some(&slot) = self.index.get(name) else {
                warn!(entity = %identity, method = name, "unknown method, not warmed");
                report.failures.push(WarmFailure {
                    method: name.to_string(),
                    reason: WarmFailureReason::NotFound,
                });
                continue;
            };

            let registered = &self.methods[slot];
            let call_args = registered.defaults.merged_with(args);
            match registered.method.warm(owner, &call_args).await {
                Ok(source) => {
                    debug!(entity = %identity, method = name, ?source, "method warmed");
                    report.methods_executed.push(name.to_string());
                }
                Err(reason) => {
                    warn!(entity = %identity, method = name, error = %reason, "warming failed");
                    report.failures.push(WarmFailure {
                        method: name.to_string(),
                        reason: WarmFailureReason::Failed(reason),
                    });
                }
            }
        }

        let entries_after = owner.list_cached_keys().await.len();
        report.cache_entries_created = entries_after.saturating_sub(entries_before);
        report.success = report.failures.is_empty() || !report.methods_executed.is_empty();
        report.execution_time = started.elapsed();

        info!(
            entity = %identity,
            executed = report.methods_executed.len(),
            failed = report.failures.len(),
            created = report.cache_entries_created,
            "cache warmed"
        );
        report
    }

    /// Warm every owner concurrently.
    pub async fn bulk_warm<T>(
        &self,
        owners: &[T],
        methods: Option<&[&str]>,
        args: &CallArgs,
    ) -> BulkWarmReport
    where
        T: std::borrow::Borrow<O>,
    {
        let started = Instant::now();

        let reports = join_all(owners.iter().map(|owner| {
            let owner = owner.borrow();
            async move {
                let report = self.warm_cache(owner, methods, args).await;
                (owner.cache_identity().to_string(), report)
            }
        }))
        .await;

        let mut bulk = BulkWarmReport {
            entities_processed: reports.len(),
            results: BTreeMap::new(),
            successful: 0,
            failed: 0,
            total_cache_entries_created: 0,
            execution_time: Duration::ZERO,
        };
        for (entity, report) in reports {
            if report.success {
                bulk.successful += 1;
            } else {
                bulk.failed += 1;
            }
            bulk.total_cache_entries_created += report.cache_entries_created;
            bulk.results.insert(entity, report);
        }
        bulk.execution_time = started.elapsed();

        info!(
            entities = bulk.entities_processed,
            successful = bulk.successful,
            failed = bulk.failed,
            created = bulk.total_cache_entries_created,
            "bulk cache warming finished"
        );
        bulk
    }
}

impl<O: CacheOwner + ?Sized> Default for MethodRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ?Sized> fmt::Debug for MethodRegistry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.methods.iter().map(|r| r.method.name()))
            .finish()
    }
}
