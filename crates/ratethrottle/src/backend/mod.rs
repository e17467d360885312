//! The pluggable atomic state store strategies, access control, and block
//! records are all read and written through.
//!
//! `Backend` is a capability interface, not a runtime-typed interchangeable
//! store: implementations are constructed once and injected into the
//! [`crate::engine::Engine`] at startup. All mutations of a single key must
//! be linearizable; no ordering is promised across distinct keys.

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

pub use memory::MemoryBackend;
#[cfg(feature = "redis-backend")]
pub use redis::RedisBackend;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Error returned by a [`Backend`] implementation. Wrapped by the engine
/// into [`crate::error::RateThrottleError::BackendUnavailable`] before it
/// reaches a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        BackendError(msg.into())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Capability set the rest of the engine consumes. A `ttl` of
/// [`Duration::ZERO`] means "no expiry".
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> BackendResult<()>;

    /// Atomically adds `delta` to the integer stored at `key` (initializing
    /// it to 0 if absent), applies `ttl`, and returns the new value.
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> BackendResult<i64>;

    /// Appends `ts` to the ordered-timestamp set at `key`, applying `ttl` to
    /// the whole set.
    async fn append_timestamp(&self, key: &str, ts: f64, ttl: Duration) -> BackendResult<()>;

    /// Removes every timestamp strictly before `cutoff` from the
    /// ordered-timestamp set at `key`.
    async fn trim_before(&self, key: &str, cutoff: f64) -> BackendResult<()>;

    /// Counts timestamps at or after `cutoff` in the ordered-timestamp set
    /// at `key`.
    async fn count_after(&self, key: &str, cutoff: f64) -> BackendResult<u64>;

    /// Returns the oldest timestamp at or after `cutoff`, if any. Used to
    /// compute `retry_after` for the sliding-window-log strategy.
    async fn oldest_after(&self, key: &str, cutoff: f64) -> BackendResult<Option<f64>>;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    async fn delete(&self, key: &str) -> BackendResult<bool>;

    /// Atomically replaces the value at `key` with `new` (applying `ttl`)
    /// only if the current value equals `expected` (`None` meaning "absent").
    /// Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> BackendResult<bool>;
}

/// Encodes a `(f64, f64)` pair (used by the token-bucket and leaky-bucket
/// strategies to persist `(level, timestamp)` state) into the byte form
/// `Backend::get`/`compare_and_swap` exchange.
pub fn encode_pair(a: f64, b: f64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&a.to_le_bytes());
    buf.extend_from_slice(&b.to_le_bytes());
    buf
}

/// Inverse of [`encode_pair`]. Returns `None` if `bytes` is not exactly 16
/// bytes long (a malformed or foreign value at this key).
pub fn decode_pair(bytes: &[u8]) -> Option<(f64, f64)> {
    if bytes.len() != 16 {
        return None;
    }
    let a = f64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let b = f64::from_le_bytes(bytes[8..16].try_into().ok()?);
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_round_trips() {
        let bytes = encode_pair(3.5, 1_700_000_000.25);
        let (a, b) = decode_pair(&bytes).unwrap();
        assert_eq!(a, 3.5);
        assert_eq!(b, 1_700_000_000.25);
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        assert!(decode_pair(&[1, 2, 3]).is_none());
    }
}
