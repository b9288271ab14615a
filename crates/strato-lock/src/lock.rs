use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LockError;

/// A held lease over a stack.
///
/// The `id` is a capability: refresh and release require possession of the
/// matching id, never just the key. A lock is valid iff `now < expires_at`
/// **and** the holder presents the stored id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub key: String,
    /// Unique instance identifier assigned per acquire.
    pub id: Uuid,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_seconds)
    }
}

/// The lock key for a tenant's stack in an environment.
pub fn lock_key(lock_prefix: &str, stack: &str, environment: &str) -> String {
    format!(
        "{}:stack:{}:{}",
        lock_prefix.trim_end_matches(':'),
        stack,
        environment
    )
}

/// Leased advisory locking over a strongly consistent single-writer store.
#[async_trait]
pub trait LockManager: Send + Sync + 'static {
    /// Take the lease. Succeeds iff no record exists or the existing record
    /// has expired; the write is conditional on that check.
    async fn acquire(
        &self,
        key: &str,
        ttl: std::time::Duration,
        owner: &str,
    ) -> Result<Lock, LockError>;

    /// Extend the lease to `now + ttl`. Fails with [`LockError::InvalidLockId`]
    /// when the stored id differs, [`LockError::Expired`] when the lease has
    /// already lapsed.
    async fn refresh(&self, lock: &Lock) -> Result<Lock, LockError>;

    /// Delete the record iff the id matches.
    async fn release(&self, lock: &Lock) -> Result<(), LockError>;

    /// Unconditional delete. Admin-only escape hatch.
    async fn force_release(&self, key: &str) -> Result<(), LockError>;

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError>;

    async fn list(&self, prefix: &str) -> Result<Vec<Lock>, LockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_scopes_by_prefix_stack_env() {
        assert_eq!(
            lock_key("tenants/t-1", "orders", "dev"),
            "tenants/t-1:stack:orders:dev"
        );
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let lock = Lock {
            key: "k".into(),
            id: Uuid::new_v4(),
            owner: "me".into(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(30),
            ttl_seconds: 30,
            metadata: BTreeMap::new(),
        };
        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(now + chrono::Duration::seconds(31)));
    }
}
