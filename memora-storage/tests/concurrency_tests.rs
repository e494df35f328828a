//! Concurrency Tests for Cache Backends
//!
//! Many tasks hammer a shared backend on a multi-threaded runtime. Afterwards
//! the entry map and recency order must agree and respect the bound.

use std::sync::Arc;

use memora_core::{CacheKey, CacheValue};
use memora_storage::{
    CacheBackend, DiskCacheBackend, InMemoryRemoteStore, Invalidation, MemoryCacheBackend,
    RemoteCacheBackend, RemoteStore,
};
use memora_test_utils::assertions::assert_consistent;
use memora_test_utils::fixtures::temp_cache_path;

const TASKS: usize = 16;
const OPS_PER_TASK: usize = 200;

fn key(task: usize, i: usize) -> CacheKey {
    // Overlapping key space across tasks.
    CacheKey::new(format!("m|/repo|{}", (task * 7 + i) % 50))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_backend_stays_consistent() {
    let backend = Arc::new(MemoryCacheBackend::new(20));

    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for i in 0..OPS_PER_TASK {
                    let k = key(task, i);
                    match i % 5 {
                        0 => {
                            backend.evict(1).await.unwrap();
                        }
                        1 | 2 => {
                            backend.get(&k).await.unwrap();
                        }
                        _ => {
                            backend.set(&k, CacheValue::Int(i as i64)).await.unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_consistent(&backend);
    assert!(backend.len().unwrap() <= 20);
    let stats = backend.stats().await.unwrap();
    assert_eq!(stats.total_entries, backend.len().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalidate_all_during_writes() {
    let backend = Arc::new(MemoryCacheBackend::new(30));

    let writer = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            for i in 0..OPS_PER_TASK {
                backend.set(&key(0, i), CacheValue::Int(i as i64)).await.unwrap();
            }
        })
    };
    let invalidator = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            for _ in 0..20 {
                backend.invalidate(&Invalidation::All).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    invalidator.await.unwrap();
    assert_consistent(&backend);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disk_backend_concurrent_writes_persist() {
    let (_dir, path) = temp_cache_path();
    let backend = Arc::new(DiskCacheBackend::open(&path, 25));

    let handles: Vec<_> = (0..4)
        .map(|task| {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for i in 0..20 {
                    backend.set(&key(task, i), CacheValue::Int(i as i64)).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    // A final save reflects the settled state regardless of interleaving.
    backend.save().await.unwrap();
    let live = backend.list_keys().await.unwrap();
    assert!(live.len() <= 25);

    let reopened = DiskCacheBackend::open(&path, 25);
    let restored = reopened.list_keys().await.unwrap();
    let live_keys: Vec<_> = live.into_iter().map(|i| i.key).collect();
    let restored_keys: Vec<_> = restored.into_iter().map(|i| i.key).collect();
    assert_eq!(restored_keys, live_keys);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_backend_stays_bounded() {
    let store = InMemoryRemoteStore::new();
    let backend = Arc::new(
        RemoteCacheBackend::connect(store.clone(), "memora:", 10, None)
            .await
            .unwrap(),
    );

    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for i in 0..OPS_PER_TASK / 4 {
                    let k = key(task, i);
                    match i % 5 {
                        0 => {
                            backend.evict(1).await.unwrap();
                        }
                        1 | 2 => {
                            backend.get(&k).await.unwrap();
                        }
                        _ => {
                            backend.set(&k, CacheValue::Int(i as i64)).await.unwrap();
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut view: Vec<String> = backend
        .list_keys()
        .await
        .unwrap()
        .into_iter()
        .map(|i| format!("memora:{}", i.key))
        .collect();
    assert!(view.len() <= 10);
    assert!(store.len().unwrap() <= 10);

    // The local view and the store agree on which keys exist.
    let mut stored = store.scan_prefix("memora:").await.unwrap();
    view.sort();
    stored.sort();
    assert_eq!(view, stored);
    assert_eq!(backend.stats().await.unwrap().total_entries, stored.len());
}
