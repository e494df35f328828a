//! Redis-backed [`RemoteStore`].
//!
//! Uses one multiplexed async connection, cloned per command. Writes with a
//! TTL use `SET .. EX`; prefix listing walks `SCAN MATCH` until the cursor
//! wraps to zero.

use std::time::Duration;

use async_trait::async_trait;
use memora_core::{MemoraError, MemoraResult};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tracing::debug;

use super::RemoteStore;

const BACKEND: &str = "redis";

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

fn unavailable(e: impl ToString) -> MemoraError {
    MemoraError::unavailable(BACKEND, e)
}

/// Redis client for the remote cache backend.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/12`).
    pub async fn connect(url: &str, connect_timeout: Duration) -> MemoraResult<Self> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| unavailable(format!("connect timed out after {:?}", connect_timeout)))?
            .map_err(unavailable)?;
        debug!(url, "redis connection established");
        Ok(Self { conn })
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn escape_match(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('*');
    out
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn get(&self, key: &str) -> MemoraResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MemoraResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> MemoraResult<bool> {
        let mut conn = self.conn.clone();
        let found: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(found)
    }

    async fn delete(&self, keys: &[String]) -> MemoraResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str) -> MemoraResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = escape_match(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_match() {
        assert_eq!(escape_match("memora:"), "memora:*");
        assert_eq!(escape_match("ns:blame|/r[1]*"), "ns:blame|/r\\[1\\]\\**");
    }
}
