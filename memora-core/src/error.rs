//! Error types for memora operations

use thiserror::Error;

/// Cache layer errors.
///
/// A cache miss is deliberately absent: backends report a miss as `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Backend not supported: {backend} ({reason})")]
    UnsupportedBackend { backend: String, reason: String },

    #[error("Method '{method}' not found")]
    UnknownMethod { method: String },
}

/// Tabular payload errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("Column {column} has {got} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("Duplicate column name: {column}")]
    DuplicateColumn { column: String },
}

/// Master error type for all memora errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoraError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

impl MemoraError {
    /// Shorthand for a [`CacheError::BackendUnavailable`].
    pub fn unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        CacheError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Shorthand for a [`CacheError::Serialization`].
    pub fn serialization(key: impl Into<String>, reason: impl ToString) -> Self {
        CacheError::Serialization {
            key: key.into(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Whether this error means the backing store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            MemoraError::Cache(CacheError::BackendUnavailable { .. })
                | MemoraError::Cache(CacheError::Io { .. })
        )
    }
}

/// Result type alias for memora operations.
pub type MemoraResult<T> = Result<T, MemoraError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_serialization() {
        let err = CacheError::Serialization {
            key: "commit_history|/repo".to_string(),
            reason: "non-finite float".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Serialization failed"));
        assert!(msg.contains("commit_history|/repo"));
        assert!(msg.contains("non-finite float"));
    }

    #[test]
    fn test_config_error_display_unknown_method() {
        let err = ConfigError::UnknownMethod {
            method: "nonexistent_method".to_string(),
        };
        assert_eq!(format!("{}", err), "Method 'nonexistent_method' not found");
    }

    #[test]
    fn test_table_error_display() {
        let err = TableError::LengthMismatch {
            column: "lines".to_string(),
            expected: 3,
            got: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("lines"));
        assert!(msg.contains("expected 3"));
    }

    #[test]
    fn test_memora_error_from_variants() {
        let cache: MemoraError = CacheError::LockPoisoned.into();
        assert!(matches!(cache, MemoraError::Cache(CacheError::LockPoisoned)));

        let config: MemoraError = ConfigError::MissingRequired {
            field: "disk_path".to_string(),
        }
        .into();
        assert!(format!("{}", config).starts_with("Config error"));
    }

    #[test]
    fn test_is_unavailable() {
        assert!(MemoraError::unavailable("redis", "connection refused").is_unavailable());
        assert!(MemoraError::from(CacheError::Io {
            path: "/tmp/x".to_string(),
            reason: "denied".to_string()
        })
        .is_unavailable());
        assert!(!MemoraError::serialization("k", "bad").is_unavailable());
        assert!(!MemoraError::from(CacheError::LockPoisoned).is_unavailable());
    }
}
