//! MEMORA Test Utilities
//!
//! Shared test infrastructure for the memora workspace:
//! - Proptest generators for values, tables, keys and call arguments
//! - A backend wrapper that can simulate an outage
//! - Fixtures for common scenarios
//! - Assertions for cache invariants

pub use memora_core::{
    ArgValue, CacheConfig, CacheEntry, CacheError, CacheKey, CacheValue, CallArgs, Column,
    ColumnData, ConfigError, DType, EntityIdentity, KeySpec, MemoraError, MemoraResult, Table,
    Timestamp,
};
pub use memora_storage::{
    BackendStats, CacheBackend, CachedKeyInfo, DiskCacheBackend, Invalidation,
    MemoryCacheBackend,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

// ============================================================================
// FAILING BACKEND
// ============================================================================

/// Wraps a [`MemoryCacheBackend`] and fails reads and/or writes on demand
/// with [`CacheError::BackendUnavailable`].
#[derive(Debug)]
pub struct FailingBackend {
    inner: MemoryCacheBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FailingBackend {
    /// A backend whose every operation fails.
    pub fn unavailable() -> Self {
        let backend = Self::healthy(100);
        backend.set_fail_reads(true);
        backend.set_fail_writes(true);
        backend
    }

    /// A working backend that can be switched to failing later.
    pub fn healthy(max_keys: usize) -> Self {
        Self {
            inner: MemoryCacheBackend::new(max_keys),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls seen, failed or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set` calls seen, failed or not.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryCacheBackend {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool) -> MemoraResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(MemoraError::unavailable("failing", "simulated outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn max_keys(&self) -> usize {
        self.inner.max_keys()
    }

    async fn get(&self, key: &CacheKey) -> MemoraResult<Option<CacheEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: CacheValue) -> MemoraResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_writes)?;
        self.inner.set(key, value).await
    }

    async fn exists(&self, key: &CacheKey) -> MemoraResult<bool> {
        self.check(&self.fail_reads)?;
        self.inner.exists(key).await
    }

    async fn evict(&self, count: usize) -> MemoraResult<usize> {
        self.check(&self.fail_writes)?;
        self.inner.evict(count).await
    }

    async fn invalidate(&self, scope: &Invalidation) -> MemoraResult<usize> {
        self.check(&self.fail_writes)?;
        self.inner.invalidate(scope).await
    }

    async fn stats(&self) -> MemoraResult<BackendStats> {
        self.check(&self.fail_reads)?;
        self.inner.stats().await
    }

    async fn list_keys(&self) -> MemoraResult<Vec<CachedKeyInfo>> {
        self.check(&self.fail_reads)?;
        self.inner.list_keys().await
    }

    async fn cache_info(&self, key: &CacheKey) -> MemoraResult<Option<CachedKeyInfo>> {
        self.check(&self.fail_reads)?;
        self.inner.cache_info(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for memora types.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    /// Generate a Timestamp within 2020-2030.
    fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a finite float.
    fn arb_finite_f64() -> impl Strategy<Value = f64> {
        prop::num::f64::NORMAL | prop::num::f64::ZERO
    }

    /// Generate short text, including the key separator and escape character.
    fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 _|\\\\/.-]{0,12}"
    }

    /// Generate an entity identity that looks like a repository path.
    pub fn arb_entity_identity() -> impl Strategy<Value = EntityIdentity> {
        prop::collection::vec("[a-z0-9_-]{1,8}", 1..4)
            .prop_map(|parts| EntityIdentity::new(format!("/{}", parts.join("/"))))
    }

    /// Generate a cache key of the form `method|/path|value`.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        ("[a-z_]{1,10}", arb_entity_identity(), "[a-z0-9]{0,6}").prop_map(
            |(prefix, identity, value)| memora_core::derive_key(&prefix, identity.as_str(), &[value]),
        )
    }

    /// Generate a column of `rows` cells with roughly one in five missing.
    fn arb_column_data(dtype: DType, rows: usize) -> BoxedStrategy<ColumnData> {
        fn cells<T: std::fmt::Debug + Clone + 'static>(
            inner: impl Strategy<Value = T> + 'static,
            rows: usize,
        ) -> impl Strategy<Value = Vec<Option<T>>> {
            prop::collection::vec(prop::option::weighted(0.8, inner), rows)
        }
        match dtype {
            DType::Int => cells(any::<i64>(), rows).prop_map(ColumnData::Int).boxed(),
            DType::Float => cells(arb_finite_f64(), rows).prop_map(ColumnData::Float).boxed(),
            DType::Text => cells(arb_text(), rows).prop_map(ColumnData::Text).boxed(),
            DType::Bool => cells(any::<bool>(), rows).prop_map(ColumnData::Bool).boxed(),
            DType::Timestamp => cells(arb_timestamp(), rows)
                .prop_map(ColumnData::Timestamp)
                .boxed(),
        }
    }

    /// Generate a DType.
    fn arb_dtype() -> impl Strategy<Value = DType> {
        prop_oneof![
            Just(DType::Int),
            Just(DType::Float),
            Just(DType::Text),
            Just(DType::Bool),
            Just(DType::Timestamp),
        ]
    }

    /// Generate a valid table (distinct column names, equal lengths).
    fn arb_table() -> impl Strategy<Value = Table> {
        (prop::collection::vec(arb_dtype(), 0..5), 0usize..8).prop_flat_map(|(dtypes, rows)| {
            let columns: Vec<_> = dtypes
                .into_iter()
                .enumerate()
                .map(|(i, dtype)| {
                    arb_column_data(dtype, rows).prop_map(move |data| Column::new(format!("c{}", i), data))
                })
                .collect();
            columns.prop_map(|columns| Table::new(columns).unwrap_or_default())
        })
    }

    /// Generate any serializable cached value, nested up to a few levels.
    pub fn arb_cache_value() -> impl Strategy<Value = CacheValue> {
        let leaf = prop_oneof![
            Just(CacheValue::Null),
            any::<bool>().prop_map(CacheValue::Bool),
            any::<i64>().prop_map(CacheValue::Int),
            arb_finite_f64().prop_map(CacheValue::Float),
            arb_text().prop_map(CacheValue::Text),
            arb_table().prop_map(CacheValue::Table),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(CacheValue::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(CacheValue::Mapping),
            ]
        })
    }

    /// Generate a keyword argument value.
    fn arb_arg_value() -> impl Strategy<Value = ArgValue> {
        prop_oneof![
            Just(ArgValue::None),
            any::<bool>().prop_map(ArgValue::Bool),
            any::<i64>().prop_map(ArgValue::Int),
            arb_text().prop_map(ArgValue::Text),
            prop::collection::vec(arb_text().prop_map(ArgValue::Text), 0..3).prop_map(ArgValue::List),
        ]
    }

    /// Generate call arguments over the field names `a`..`d`.
    pub fn arb_call_args() -> impl Strategy<Value = CallArgs> {
        prop::collection::btree_map("[a-d]", arb_arg_value(), 0..4).prop_map(|map| {
            let mut args = CallArgs::new();
            for (name, value) in map {
                args.set(name, value);
            }
            args
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// A small commit-history table with missing cells in every column type.
    pub fn sample_table() -> Table {
        let t0 = chrono::Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now);
        Table::new(vec![
            Column::timestamp("date", vec![Some(t0), Some(t0), None]),
            Column::text("committer", vec![Some("ada"), None, Some("grace")]),
            Column::int("lines", vec![Some(120), Some(-4), None]),
            Column::float("churn", vec![Some(0.5), None, Some(2.25)]),
            Column::bool("merge", vec![Some(false), Some(true), None]),
        ])
        .unwrap_or_default()
    }

    /// A temporary directory and a snapshot path inside a not-yet-created
    /// subdirectory. Keep the `TempDir` alive for the duration of the test.
    pub fn temp_cache_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("cannot create temp dir: {}", e));
        let path = dir.path().join("cache").join("memora.json.gz");
        (dir, path)
    }

    /// `KeySpec` for a commit-history style method.
    pub fn history_spec() -> KeySpec {
        KeySpec::new("commit_history", ["branch", "limit", "days"])
            .unwrap_or_else(|e| panic!("invalid fixture spec: {}", e))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache invariants.

    use super::*;

    /// Assert that a backend lists exactly `expected` keys, oldest first.
    pub async fn assert_key_order(backend: &dyn CacheBackend, expected: &[&str]) {
        let keys: Vec<String> = backend
            .list_keys()
            .await
            .unwrap_or_else(|e| panic!("list_keys failed: {}", e))
            .into_iter()
            .map(|info| info.key.into_string())
            .collect();
        assert_eq!(keys, expected, "unexpected LRU order");
    }

    /// Assert that a memory backend's map and order agree and respect the bound.
    #[track_caller]
    pub fn assert_consistent(backend: &MemoryCacheBackend) {
        let report = backend
            .check_integrity()
            .unwrap_or_else(|e| panic!("integrity check failed: {}", e));
        assert!(report.is_consistent(), "inconsistent cache: {:?}", report);
    }

    /// Assert that a MemoraResult is a backend-unavailable error.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &MemoraResult<T>) {
        match result {
            Err(e) if e.is_unavailable() => {}
            other => panic!("Expected unavailable error, got: {:?}", other),
        }
    }
}
