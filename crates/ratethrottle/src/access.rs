//! Allow-set and deny-set: the auxiliary access-control layer the engine
//! consults before strategy evaluation (`spec.md` §4.3).
//!
//! Entries may live in-process ([`InProcessAccessControl`]) or in the shared
//! [`crate::backend::Backend`] ([`BackendAccessControl`]) — `spec.md`'s Open
//! Question on this is resolved by treating both as pluggable and leaving
//! the choice to whoever constructs the [`crate::engine::Engine`]. Grounded
//! on the `Acl` (`Blocklists`/`Allowlist`) split in the sui-core traffic
//! controller's access-control layer, which draws the same local-vs-shared
//! line.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::backend::{Backend, BackendResult};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Capability the engine consults for allow/deny membership. `is_denied`
/// returns the deny entry's absolute expiry (epoch seconds), if any and
/// still active.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn add_allow(&self, identifier: &str) -> BackendResult<()>;
    async fn remove_allow(&self, identifier: &str) -> BackendResult<()>;
    async fn is_allowed(&self, identifier: &str) -> BackendResult<bool>;

    /// `ttl = Duration::ZERO` means the deny entry never expires on its own.
    async fn add_deny(&self, identifier: &str, ttl: Duration) -> BackendResult<()>;
    async fn remove_deny(&self, identifier: &str) -> BackendResult<()>;
    /// Returns `(denied, expiry_epoch_secs)`. `expiry_epoch_secs` is `None`
    /// for a permanent deny entry.
    async fn is_denied(&self, identifier: &str) -> BackendResult<(bool, Option<u64>)>;
}

struct DenyEntry {
    expires_at: Option<u64>,
}

impl DenyEntry {
    fn is_active(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// In-process access control: an `RwLock`-guarded set and map. Not shared
/// across instances — use [`BackendAccessControl`] for that.
#[derive(Default)]
pub struct InProcessAccessControl {
    allow: RwLock<HashSet<String>>,
    deny: RwLock<HashMap<String, DenyEntry>>,
}

impl InProcessAccessControl {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessControl for InProcessAccessControl {
    async fn add_allow(&self, identifier: &str) -> BackendResult<()> {
        self.allow
            .write()
            .expect("allow-set lock poisoned")
            .insert(identifier.to_string());
        Ok(())
    }

    async fn remove_allow(&self, identifier: &str) -> BackendResult<()> {
        self.allow
            .write()
            .expect("allow-set lock poisoned")
            .remove(identifier);
        Ok(())
    }

    async fn is_allowed(&self, identifier: &str) -> BackendResult<bool> {
        Ok(self
            .allow
            .read()
            .expect("allow-set lock poisoned")
            .contains(identifier))
    }

    async fn add_deny(&self, identifier: &str, ttl: Duration) -> BackendResult<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(now_secs() + ttl.as_secs().max(1))
        };
        self.deny
            .write()
            .expect("deny-set lock poisoned")
            .insert(identifier.to_string(), DenyEntry { expires_at });
        Ok(())
    }

    async fn remove_deny(&self, identifier: &str) -> BackendResult<()> {
        self.deny
            .write()
            .expect("deny-set lock poisoned")
            .remove(identifier);
        Ok(())
    }

    async fn is_denied(&self, identifier: &str) -> BackendResult<(bool, Option<u64>)> {
        let now = now_secs();
        let mut guard = self.deny.write().expect("deny-set lock poisoned");
        match guard.get(identifier) {
            Some(entry) if entry.is_active(now) => Ok((true, entry.expires_at)),
            Some(_) => {
                // Expired; clear it out so future lookups are O(1) clean.
                guard.remove(identifier);
                Ok((false, None))
            }
            None => Ok((false, None)),
        }
    }
}

const ALLOW_PREFIX: &str = "rt:allow:";
const DENY_PREFIX: &str = "rt:deny:";

/// Access control backed by the shared [`Backend`], for deployments that
/// need allow/deny membership consistent across instances.
pub struct BackendAccessControl {
    backend: std::sync::Arc<dyn Backend>,
}

impl BackendAccessControl {
    pub fn new(backend: std::sync::Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AccessControl for BackendAccessControl {
    async fn add_allow(&self, identifier: &str) -> BackendResult<()> {
        self.backend
            .set(&format!("{ALLOW_PREFIX}{identifier}"), vec![1], Duration::ZERO)
            .await
    }

    async fn remove_allow(&self, identifier: &str) -> BackendResult<()> {
        self.backend
            .delete(&format!("{ALLOW_PREFIX}{identifier}"))
            .await
            .map(|_| ())
    }

    async fn is_allowed(&self, identifier: &str) -> BackendResult<bool> {
        self.backend.exists(&format!("{ALLOW_PREFIX}{identifier}")).await
    }

    async fn add_deny(&self, identifier: &str, ttl: Duration) -> BackendResult<()> {
        let key = format!("{DENY_PREFIX}{identifier}");
        let expires_at = if ttl.is_zero() {
            0u64
        } else {
            now_secs() + ttl.as_secs().max(1)
        };
        self.backend.set(&key, expires_at.to_le_bytes().to_vec(), ttl).await
    }

    async fn remove_deny(&self, identifier: &str) -> BackendResult<()> {
        self.backend
            .delete(&format!("{DENY_PREFIX}{identifier}"))
            .await
            .map(|_| ())
    }

    async fn is_denied(&self, identifier: &str) -> BackendResult<(bool, Option<u64>)> {
        let key = format!("{DENY_PREFIX}{identifier}");
        match self.backend.get(&key).await? {
            Some(bytes) if bytes.len() == 8 => {
                let expires_at = u64::from_le_bytes(bytes.try_into().unwrap());
                if expires_at == 0 {
                    Ok((true, None))
                } else if expires_at > now_secs() {
                    Ok((true, Some(expires_at)))
                } else {
                    self.backend.delete(&key).await?;
                    Ok((false, None))
                }
            }
            _ => Ok((false, None)),
        }
    }
}
