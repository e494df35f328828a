//! Cache key derivation.
//!
//! A [`CacheKey`] identifies one memoized call. It is derived from three
//! parts, always in the same order:
//!
//! 1. the method prefix declared by a [`KeySpec`],
//! 2. the owning entity's canonical [`EntityIdentity`],
//! 3. the values of the declared key fields, in declared order.
//!
//! # Format
//!
//! `prefix|entity|value1|value2...`
//!
//! The entity and the field values are escaped (`\` becomes `\\`, `|`
//! becomes `\|`), so distinct inputs can never produce the same key. The
//! prefix may not contain the separator at all, which keeps
//! [`CacheKey::method_prefix`] and [`CacheKey::belongs_to`] unambiguous.
//!
//! Call-site keyword order never matters because [`CallArgs`] is a sorted map
//! and the key reads fields in the order the [`KeySpec`] declares them. The
//! force-refresh flag lives outside the argument map and cannot reach a key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Separator between key components.
pub const KEY_SEPARATOR: char = '|';

/// Field name reserved for the per-call force-refresh flag.
pub const FORCE_REFRESH_FIELD: &str = "force_refresh";

const ESCAPE: char = '\\';

/// Rendering of a key field that was not supplied by the caller.
const MISSING_FIELD: &str = "None";

fn escape_component(raw: &str, out: &mut String) {
    for ch in raw.chars() {
        if ch == ESCAPE || ch == KEY_SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
}

/// Derive a cache key from its already-rendered parts.
///
/// Pure function: identical inputs always give identical keys.
pub fn derive_key<S: AsRef<str>>(prefix: &str, entity_id: &str, ordered_field_values: &[S]) -> CacheKey {
    let mut key = String::with_capacity(
        prefix.len()
            + entity_id.len()
            + ordered_field_values
                .iter()
                .map(|v| v.as_ref().len() + 1)
                .sum::<usize>()
            + 1,
    );
    key.push_str(prefix);
    key.push(KEY_SEPARATOR);
    escape_component(entity_id, &mut key);
    for value in ordered_field_values {
        key.push(KEY_SEPARATOR);
        escape_component(value.as_ref(), &mut key);
    }
    CacheKey(key)
}

// ============================================================================
// ENTITY IDENTITY
// ============================================================================

/// Canonical identity of the entity that owns cached results (for example a
/// repository path).
///
/// Construction canonicalizes the raw string: surrounding whitespace and
/// trailing path separators are removed, so `/path/to/repo` and
/// `/path/to/repo/` share one key namespace. A bare root (`/`) is kept as
/// is. No filesystem access happens here, so symlinks are not resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityIdentity(String);

impl EntityIdentity {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let stripped = trimmed.trim_end_matches(['/', '\\']);
        if stripped.is_empty() && !trimmed.is_empty() {
            // Root path: keep a single separator.
            let root = &trimmed[..trimmed.chars().next().map(char::len_utf8).unwrap_or(0)];
            return Self(root.to_string());
        }
        Self(stripped.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component, or the whole identity when it has none.
    pub fn name(&self) -> &str {
        self.0
            .rsplit(['/', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or(&self.0)
    }

    fn escaped(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        escape_component(&self.0, &mut out);
        out
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityIdentity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// CACHE KEY
// ============================================================================

/// Opaque string key of one memoized call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string (for example one read back from storage).
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The method prefix, i.e. everything before the first separator.
    pub fn method_prefix(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map(|(prefix, _)| prefix)
            .unwrap_or(&self.0)
    }

    /// Whether this key lives in the namespace of `identity`.
    pub fn belongs_to(&self, identity: &EntityIdentity) -> bool {
        let Some((_, rest)) = self.0.split_once(KEY_SEPARATOR) else {
            return false;
        };
        let namespace = identity.escaped();
        match rest.strip_prefix(namespace.as_str()) {
            Some(tail) => tail.is_empty() || tail.starts_with(KEY_SEPARATOR),
            None => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// CALL ARGUMENTS
// ============================================================================

/// A keyword argument value as seen by key derivation.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ArgValue>),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::None => f.write_str(MISSING_FIELD),
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(x) => write!(f, "{:?}", x),
            ArgValue::Text(s) => f.write_str(s),
            ArgValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(value.into())
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(value.into())
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl<T: Into<ArgValue>> From<Vec<T>> for ArgValue {
    fn from(value: Vec<T>) -> Self {
        ArgValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ArgValue::None)
    }
}

/// Keyword arguments of one call plus the cache-control flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    values: BTreeMap<String, ArgValue>,
    force_refresh: bool,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a keyword argument.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Request a forced refresh: skip the cache read, still write the result.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_force_refresh(&self) -> bool {
        self.force_refresh
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Layer `overrides` on top of `self`. Values and the force-refresh flag
    /// from `overrides` win.
    pub fn merged_with(&self, overrides: &CallArgs) -> CallArgs {
        let mut merged = self.clone();
        for (name, value) in &overrides.values {
            merged.values.insert(name.clone(), value.clone());
        }
        merged.force_refresh = self.force_refresh || overrides.force_refresh;
        merged
    }
}

// ============================================================================
// KEY SPEC
// ============================================================================

/// Per-method key declaration: a prefix and the ordered key fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    prefix: String,
    fields: Vec<String>,
}

impl KeySpec {
    pub fn new<I, S>(prefix: impl Into<String>, fields: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "prefix".to_string(),
            });
        }
        if prefix.contains(KEY_SEPARATOR) {
            return Err(ConfigError::InvalidValue {
                field: "prefix".to_string(),
                value: prefix,
                reason: format!("must not contain '{}'", KEY_SEPARATOR),
            });
        }

        let mut declared: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if field == FORCE_REFRESH_FIELD {
                return Err(ConfigError::InvalidValue {
                    field: "fields".to_string(),
                    value: field,
                    reason: "cache-control flags cannot be key fields".to_string(),
                });
            }
            if declared.contains(&field) {
                return Err(ConfigError::InvalidValue {
                    field: "fields".to_string(),
                    value: field,
                    reason: "declared twice".to_string(),
                });
            }
            declared.push(field);
        }

        Ok(Self {
            prefix,
            fields: declared,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Derive the key for one call.
    pub fn derive(&self, identity: &EntityIdentity, args: &CallArgs) -> CacheKey {
        let values: Vec<String> = self
            .fields
            .iter()
            .map(|field| match args.get(field) {
                Some(value) => value.to_string(),
                None => MISSING_FIELD.to_string(),
            })
            .collect();
        derive_key(&self.prefix, identity.as_str(), &values)
    }
}
