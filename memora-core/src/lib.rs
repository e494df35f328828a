//! MEMORA Core - Cache Data Types
//!
//! Values, tables, entries and keys shared by every memora crate, plus the
//! error taxonomy, configuration and tracing setup. Nothing in here performs
//! I/O; storage lives in `memora-storage`.

use chrono::{DateTime, Utc};

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod table;
pub mod telemetry;
pub mod value;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use config::{BackendKind, CacheConfig, RemoteConfig, DEFAULT_MAX_KEYS};
pub use entry::CacheEntry;
pub use error::{CacheError, ConfigError, MemoraError, MemoraResult, TableError};
pub use key::{
    derive_key, ArgValue, CacheKey, CallArgs, EntityIdentity, KeySpec, FORCE_REFRESH_FIELD,
    KEY_SEPARATOR,
};
pub use table::{Column, ColumnData, DType, Table};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use value::CacheValue;
