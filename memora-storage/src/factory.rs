//! Build a backend from [`CacheConfig`].

use std::sync::Arc;

use memora_core::{BackendKind, CacheConfig, ConfigError, MemoraResult};
use tracing::info;

use crate::disk::DiskCacheBackend;
use crate::memory::MemoryCacheBackend;
use crate::traits::CacheBackend;

/// Open the backend `config` describes.
///
/// The remote variant needs the `redis` cargo feature; without it this
/// returns [`ConfigError::UnsupportedBackend`].
pub async fn open_backend(config: &CacheConfig) -> MemoraResult<Arc<dyn CacheBackend>> {
    config.validate()?;

    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryCacheBackend::new(config.max_keys)),
        BackendKind::Disk => {
            let path = config
                .disk_path
                .clone()
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: "disk_path".to_string(),
                })?;
            Arc::new(
                DiskCacheBackend::open(path, config.max_keys)
                    .with_persist_on_write(config.persist_on_write),
            )
        }
        BackendKind::Remote => open_remote(config).await?,
    };

    info!(
        backend = backend.name(),
        max_keys = backend.max_keys(),
        "cache backend opened"
    );
    Ok(backend)
}

#[cfg(feature = "redis")]
async fn open_remote(config: &CacheConfig) -> MemoraResult<Arc<dyn CacheBackend>> {
    use crate::remote::{RedisStore, RemoteCacheBackend};

    let store = RedisStore::connect(&config.remote.url, config.remote.connect_timeout).await?;
    let backend = RemoteCacheBackend::connect(
        store,
        config.remote.namespace.clone(),
        config.max_keys,
        config.remote.ttl,
    )
    .await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
async fn open_remote(_config: &CacheConfig) -> MemoraResult<Arc<dyn CacheBackend>> {
    Err(ConfigError::UnsupportedBackend {
        backend: "remote".to_string(),
        reason: "memora-storage was built without the `redis` feature".to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memora_core::MemoraError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_memory() {
        let backend = open_backend(&CacheConfig::memory(5)).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.max_keys(), 5);
    }

    #[tokio::test]
    async fn test_open_disk() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::disk(dir.path().join("c.json.gz"), 7);
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "disk");
        assert_eq!(backend.max_keys(), 7);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let err = open_backend(&CacheConfig::memory(0)).await.err().unwrap();
        assert!(matches!(err, MemoraError::Config(ConfigError::InvalidValue { .. })));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_remote_without_feature() {
        let config = CacheConfig::remote("redis://localhost:6379", 10);
        let err = open_backend(&config).await.err().unwrap();
        assert!(matches!(
            err,
            MemoraError::Config(ConfigError::UnsupportedBackend { .. })
        ));
    }
}
