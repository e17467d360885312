//! Redis-backed [`Backend`], for deployments that need bucket state shared
//! across instances (`spec.md` §4.1). Gated behind the `redis-backend`
//! feature; dependency sourced from the `redis` crate used the same way in
//! the reference caddy Redis storage module (`connection-manager`,
//! `tokio-comp`).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{Backend, BackendError, BackendResult};

fn map_err(err: redis::RedisError) -> BackendError {
    BackendError::new(err.to_string())
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

/// Atomic compare-and-swap via `EVAL`: Redis has no native CAS primitive, so
/// the check-then-set runs inside a Lua script to stay linearizable against
/// concurrent callers.
const CAS_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
local matches
if ARGV[4] == "1" then
    matches = (current == false)
else
    matches = (current == ARGV[1])
end
if matches then
    if ARGV[3] == "" then
        redis.call("SET", KEYS[1], ARGV[2])
    else
        redis.call("SET", KEYS[1], ARGV[2], "EX", ARGV[3])
    end
    return 1
else
    return 0
end
"#;

/// Wraps a `redis::aio::ConnectionManager`, which transparently reconnects
/// and pipelines requests over a single multiplexed connection.
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> BackendResult<Self> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = client.get_connection_manager().await.map_err(map_err)?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            conn.set(key, value).await.map_err(map_err)
        } else {
            conn.set_ex(key, value, ttl.as_secs().max(1)).await.map_err(map_err)
        }
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> BackendResult<i64> {
        let mut conn = self.conn.clone();
        let new_value: i64 = conn.incr(key, delta).await.map_err(map_err)?;
        if !ttl.is_zero() {
            let _: () = conn.expire(key, ttl_secs(ttl)).await.map_err(map_err)?;
        }
        Ok(new_value)
    }

    async fn append_timestamp(&self, key: &str, ts: f64, ttl: Duration) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        // A plain stringified timestamp collides as a sorted-set member when
        // two samples land at the same instant, silently merging them into
        // one entry. A per-key sequence number keeps every append distinct
        // while the score (the timestamp itself) still drives range queries.
        let seq: i64 = conn.incr(format!("{key}:seq"), 1).await.map_err(map_err)?;
        let member = format!("{ts}:{seq}");
        let _: () = conn.zadd(key, member, ts).await.map_err(map_err)?;
        if !ttl.is_zero() {
            let _: () = conn.expire(key, ttl_secs(ttl)).await.map_err(map_err)?;
            let _: () = conn.expire(format!("{key}:seq"), ttl_secs(ttl)).await.map_err(map_err)?;
        }
        Ok(())
    }

    async fn trim_before(&self, key: &str, cutoff: f64) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zrembyscore(key, f64::NEG_INFINITY, cutoff - f64::EPSILON)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn count_after(&self, key: &str, cutoff: f64) -> BackendResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcount(key, cutoff, f64::INFINITY).await.map_err(map_err)?;
        Ok(count)
    }

    async fn oldest_after(&self, key: &str, cutoff: f64) -> BackendResult<Option<f64>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(key, cutoff, f64::INFINITY, 0, 1)
            .await
            .map_err(map_err)?;
        // Members are `"{ts}:{seq}"` (see `append_timestamp`); the score
        // itself is the authoritative timestamp, but it isn't returned by a
        // plain `ZRANGEBYSCORE`, so recover it from the member's prefix.
        Ok(members
            .first()
            .and_then(|m| m.rsplit_once(':'))
            .and_then(|(ts, _seq)| ts.parse().ok()))
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(map_err)
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> BackendResult<bool> {
        let mut conn = self.conn.clone();
        let expected_is_none = expected.is_none();
        let expected = expected.unwrap_or_default();
        let ttl_arg = if ttl.is_zero() { String::new() } else { ttl_secs(ttl).to_string() };

        let result: i64 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(new)
            .arg(ttl_arg)
            .arg(if expected_is_none { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(result == 1)
    }
}
