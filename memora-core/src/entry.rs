//! The unit of storage.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::value::CacheValue;

/// A cached value together with the moment it was written.
///
/// Entries are never mutated in place; a rewrite replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    value: CacheValue,
    cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(value: CacheValue) -> Self {
        Self::with_timestamp(value, Utc::now())
    }

    /// Create an entry with an explicit creation timestamp (used when
    /// restoring persisted entries).
    pub fn with_timestamp(value: CacheValue, cached_at: DateTime<Utc>) -> Self {
        Self { value, cached_at }
    }

    pub fn value(&self) -> &CacheValue {
        &self.value
    }

    pub fn into_value(self) -> CacheValue {
        self.value
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Age relative to `now`; clock skew into the future yields zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_age() {
        let now = Utc::now();
        let entry = CacheEntry::with_timestamp(CacheValue::Int(1), now - ChronoDuration::seconds(90));
        assert_eq!(entry.age(now), Duration::from_secs(90));
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let now = Utc::now();
        let entry = CacheEntry::with_timestamp(CacheValue::Null, now + ChronoDuration::seconds(5));
        assert_eq!(entry.age(now), Duration::ZERO);
    }

    #[test]
    fn test_new_is_stamped_now() {
        let before = Utc::now();
        let entry = CacheEntry::new("x".into());
        assert!(entry.cached_at() >= before);
        assert_eq!(entry.value().as_text(), Some("x"));
    }
}
