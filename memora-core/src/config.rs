//! Cache configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default bound on the number of cached entries per backend.
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Default key namespace for the remote store.
pub const DEFAULT_REMOTE_NAMESPACE: &str = "memora:";

/// Default connect timeout for the remote store.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Which storage variant backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    #[default]
    Memory,
    Disk,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Disk => "disk",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "disk" | "file" => Ok(BackendKind::Disk),
            "remote" | "redis" => Ok(BackendKind::Remote),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
                reason: "expected one of memory, disk, remote".to_string(),
            }),
        }
    }
}

/// Connection settings for the remote key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    /// Prepended to every key written remotely.
    pub namespace: String,
    /// Expiry applied to every remote write. `None` keeps entries until evicted.
    pub ttl: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: DEFAULT_REMOTE_NAMESPACE.to_string(),
            ttl: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Backend selection and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub max_keys: usize,
    /// Snapshot file for the disk backend.
    pub disk_path: Option<PathBuf>,
    /// Save the disk snapshot after every mutating operation.
    pub persist_on_write: bool,
    pub remote: RemoteConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            max_keys: DEFAULT_MAX_KEYS,
            disk_path: None,
            persist_on_write: true,
            remote: RemoteConfig::default(),
        }
    }
}

impl CacheConfig {
    /// In-memory configuration with the given bound.
    pub fn memory(max_keys: usize) -> Self {
        Self::default().with_max_keys(max_keys)
    }

    /// Disk-backed configuration writing to `path`.
    pub fn disk(path: impl Into<PathBuf>, max_keys: usize) -> Self {
        Self {
            backend: BackendKind::Disk,
            disk_path: Some(path.into()),
            ..Self::default()
        }
        .with_max_keys(max_keys)
    }

    /// Remote configuration pointing at `url`.
    pub fn remote(url: impl Into<String>, max_keys: usize) -> Self {
        let mut config = Self {
            backend: BackendKind::Remote,
            ..Self::default()
        }
        .with_max_keys(max_keys);
        config.remote.url = url.into();
        config
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn with_persist_on_write(mut self, persist: bool) -> Self {
        self.persist_on_write = persist;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.remote.namespace = namespace.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.remote.ttl = ttl;
        self
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMORA_CACHE_BACKEND`: memory, disk or remote (default: memory)
    /// - `MEMORA_CACHE_MAX_KEYS`: entry bound (default: 1000)
    /// - `MEMORA_CACHE_PATH`: snapshot file for the disk backend
    /// - `MEMORA_CACHE_PERSIST_ON_WRITE`: save after each write (default: true)
    /// - `MEMORA_REDIS_URL`: remote store URL
    /// - `MEMORA_REDIS_NAMESPACE`: remote key prefix (default: "memora:")
    /// - `MEMORA_CACHE_TTL_SECS`: expiry for remote writes (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("MEMORA_CACHE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.backend,
        };

        let max_keys = match lookup("MEMORA_CACHE_MAX_KEYS") {
            Some(raw) => parse_number("MEMORA_CACHE_MAX_KEYS", &raw)?,
            None => defaults.max_keys,
        };

        let persist_on_write = lookup("MEMORA_CACHE_PERSIST_ON_WRITE")
            .map(|s| {
                let s = s.trim().to_lowercase();
                s != "false" && s != "0"
            })
            .unwrap_or(defaults.persist_on_write);

        let ttl = match lookup("MEMORA_CACHE_TTL_SECS") {
            Some(raw) => {
                let secs: u64 = parse_number("MEMORA_CACHE_TTL_SECS", &raw)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let remote = RemoteConfig {
            url: lookup("MEMORA_REDIS_URL").unwrap_or(defaults.remote.url),
            namespace: lookup("MEMORA_REDIS_NAMESPACE").unwrap_or(defaults.remote.namespace),
            ttl,
            connect_timeout: defaults.remote.connect_timeout,
        };

        let config = Self {
            backend,
            max_keys,
            disk_path: lookup("MEMORA_CACHE_PATH").map(PathBuf::from),
            persist_on_write,
            remote,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration describes a usable backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_keys == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_keys".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        match self.backend {
            BackendKind::Memory => {}
            BackendKind::Disk => {
                if self.disk_path.is_none() {
                    return Err(ConfigError::MissingRequired {
                        field: "disk_path".to_string(),
                    });
                }
            }
            BackendKind::Remote => {
                if self.remote.namespace.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "remote.namespace".to_string(),
                        value: String::new(),
                        reason: "must not be empty".to_string(),
                    });
                }
                if self.remote.url.is_empty() {
                    return Err(ConfigError::MissingRequired {
                        field: "remote.url".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "not a non-negative integer".to_string(),
    })
}
