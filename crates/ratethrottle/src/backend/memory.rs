//! In-process [`Backend`] over sharded, mutex-guarded maps.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Backend, BackendError, BackendResult};

const DEFAULT_SHARDS: usize = 32;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const SWEEP_WRITE_THRESHOLD: u64 = 1_000;

#[derive(Clone)]
enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    /// Kept sorted ascending; small enough in practice (bounded by window
    /// length and request rate) that a `Vec` outperforms a tree.
    Timestamps(Vec<f64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

type Shard = Mutex<HashMap<String, Entry>>;

/// Sharded-mutex in-process backend. Suitable for a single instance; for
/// state shared across instances use [`super::RedisBackend`].
///
/// Expired entries are evicted lazily on access regardless of whether the
/// background sweeper is running; call [`MemoryBackend::spawn_sweeper`]
/// once, from within a Tokio runtime, to additionally reclaim memory for
/// keys nobody reads again.
pub struct MemoryBackend {
    shards: Vec<Shard>,
    writes_since_sweep: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Self::with_shard_count(DEFAULT_SHARDS)
    }

    pub fn with_shard_count(shard_count: usize) -> Arc<Self> {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect();
        Arc::new(Self {
            shards,
            writes_since_sweep: AtomicU64::new(0),
        })
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Bumps the write counter and, once it crosses
    /// [`SWEEP_WRITE_THRESHOLD`], sweeps inline — the write-count half of
    /// "every 1s or every 1000 writes, whichever first". The timer half
    /// runs on whatever task called [`MemoryBackend::spawn_sweeper`].
    fn note_write(&self) {
        let count = self.writes_since_sweep.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= SWEEP_WRITE_THRESHOLD {
            self.writes_since_sweep.store(0, Ordering::Relaxed);
            self.sweep();
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        for shard in &self.shards {
            let mut guard = shard.lock().expect("memory backend shard mutex poisoned");
            guard.retain(|_, entry| !entry.is_expired(now));
        }
    }

    /// Spawns the background sweeper task on the current Tokio runtime,
    /// running every second to evict expired entries proactively. Returns
    /// the task handle so callers can abort it on shutdown if desired.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                this.sweep();
            }
        })
    }

    fn ttl_to_expiry(ttl: Duration) -> Option<Instant> {
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        // `new()` returns an `Arc`; this inherent `Default` exists only so
        // callers composing generic builders can rely on the trait.
        let shards = (0..DEFAULT_SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards,
            writes_since_sweep: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        match guard.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Bytes(b) => Ok(Some(b.clone())),
                Value::Int(i) => Ok(Some(i.to_le_bytes().to_vec())),
                Value::Timestamps(_) => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> BackendResult<()> {
        let expires_at = Self::ttl_to_expiry(ttl);
        let mut guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        guard.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value),
                expires_at,
            },
        );
        drop(guard);
        self.note_write();
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> BackendResult<i64> {
        let now = Instant::now();
        let expires_at = Self::ttl_to_expiry(ttl);
        let new_value = {
            let mut guard = self.shard_for(key).lock().expect("shard mutex poisoned");
            let entry = guard.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Int(0),
                expires_at,
            });
            if entry.is_expired(now) {
                entry.value = Value::Int(0);
                entry.expires_at = expires_at;
            }
            let current = match entry.value {
                Value::Int(i) => i,
                _ => 0,
            };
            let updated = current + delta;
            entry.value = Value::Int(updated);
            if expires_at.is_some() {
                entry.expires_at = expires_at;
            }
            updated
        };
        self.note_write();
        Ok(new_value)
    }

    async fn append_timestamp(&self, key: &str, ts: f64, ttl: Duration) -> BackendResult<()> {
        let now = Instant::now();
        let expires_at = Self::ttl_to_expiry(ttl);
        let mut guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        let entry = guard.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Timestamps(Vec::new()),
            expires_at,
        });
        if entry.is_expired(now) {
            entry.value = Value::Timestamps(Vec::new());
        }
        if let Value::Timestamps(list) = &mut entry.value {
            let pos = list.partition_point(|&x| x <= ts);
            list.insert(pos, ts);
        } else {
            entry.value = Value::Timestamps(vec![ts]);
        }
        if expires_at.is_some() {
            entry.expires_at = expires_at;
        }
        drop(guard);
        self.note_write();
        Ok(())
    }

    async fn trim_before(&self, key: &str, cutoff: f64) -> BackendResult<()> {
        let mut guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        if let Some(entry) = guard.get_mut(key) {
            if let Value::Timestamps(list) = &mut entry.value {
                list.retain(|&ts| ts >= cutoff);
            }
        }
        Ok(())
    }

    async fn count_after(&self, key: &str, cutoff: f64) -> BackendResult<u64> {
        let now = Instant::now();
        let guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        match guard.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                if let Value::Timestamps(list) = &entry.value {
                    let pos = list.partition_point(|&x| x < cutoff);
                    Ok((list.len() - pos) as u64)
                } else {
                    Ok(0)
                }
            }
            _ => Ok(0),
        }
    }

    async fn oldest_after(&self, key: &str, cutoff: f64) -> BackendResult<Option<f64>> {
        let now = Instant::now();
        let guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        match guard.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                if let Value::Timestamps(list) = &entry.value {
                    let pos = list.partition_point(|&x| x < cutoff);
                    Ok(list.get(pos).copied())
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let now = Instant::now();
        let guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        Ok(matches!(guard.get(key), Some(entry) if !entry.is_expired(now)))
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let mut guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        Ok(guard.remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> BackendResult<bool> {
        let now = Instant::now();
        let expires_at = Self::ttl_to_expiry(ttl);
        let mut guard = self.shard_for(key).lock().expect("shard mutex poisoned");
        let current = guard.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else if let Value::Bytes(b) = &entry.value {
                Some(b.clone())
            } else {
                None
            }
        });
        if current == expected {
            guard.insert(
                key.to_string(),
                Entry {
                    value: Value::Bytes(new),
                    expires_at,
                },
            );
            drop(guard);
            self.note_write();
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
