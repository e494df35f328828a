//! In-process [`RemoteStore`] for single-host deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use memora_core::{CacheError, MemoraError, MemoraResult};

use super::RemoteStore;

#[derive(Debug)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Shared {
    slots: Mutex<HashMap<String, Slot>>,
    offline: AtomicBool,
}

/// Key-value map with per-key expiry. Clones share the same data, so two
/// backends built from clones behave like two clients of one server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemoteStore {
    shared: Arc<Shared>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection.
    pub fn set_online(&self, online: bool) {
        self.shared.offline.store(!online, Ordering::SeqCst);
    }

    /// Number of live keys across all namespaces.
    pub fn len(&self) -> MemoraResult<usize> {
        let now = Instant::now();
        Ok(self.slots()?.values().filter(|s| s.is_live(now)).count())
    }

    pub fn is_empty(&self) -> MemoraResult<bool> {
        Ok(self.len()? == 0)
    }

    fn slots(&self) -> MemoraResult<MutexGuard<'_, HashMap<String, Slot>>> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(MemoraError::unavailable("in-memory remote", "store offline"));
        }
        self.shared
            .slots
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, key: &str) -> MemoraResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut slots = self.slots()?;
        match slots.get(key) {
            Some(slot) if slot.is_live(now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MemoraResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.slots()?
            .insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn exists(&self, key: &str) -> MemoraResult<bool> {
        let now = Instant::now();
        Ok(self.slots()?.get(key).is_some_and(|s| s.is_live(now)))
    }

    async fn delete(&self, keys: &[String]) -> MemoraResult<usize> {
        let now = Instant::now();
        let mut slots = self.slots()?;
        Ok(keys
            .iter()
            .filter(|k| slots.remove(k.as_str()).is_some_and(|s| s.is_live(now)))
            .count())
    }

    async fn scan_prefix(&self, prefix: &str) -> MemoraResult<Vec<String>> {
        let now = Instant::now();
        let mut slots = self.slots()?;
        slots.retain(|_, slot| slot.is_live(now));
        Ok(slots
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
