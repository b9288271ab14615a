use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::LockError;
use crate::lock::{Lock, LockManager};

/// In-memory implementation of [`LockManager`].
///
/// One `RwLock` over the record map gives conditional-put semantics:
/// check-existence-or-expiry and the write happen under the same guard, as a
/// conditional put against a strongly consistent table would.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockManager {
    inner: Arc<RwLock<BTreeMap<String, Lock>>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(
        &self,
        key: &str,
        ttl: std::time::Duration,
        owner: &str,
    ) -> Result<Lock, LockError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();

        if let Some(existing) = guard.get(key) {
            if !existing.is_expired(now) {
                return Err(LockError::AlreadyHeld {
                    key: key.to_string(),
                    owner: existing.owner.clone(),
                    acquired_at: existing.acquired_at,
                    expires_at: existing.expires_at,
                });
            }
            debug!(key, prior_owner = %existing.owner, "taking over expired lease");
        }

        let ttl_seconds = ttl.as_secs();
        let lock = Lock {
            key: key.to_string(),
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + ChronoDuration::seconds(ttl_seconds as i64),
            ttl_seconds,
            metadata: BTreeMap::new(),
        };
        guard.insert(key.to_string(), lock.clone());
        Ok(lock)
    }

    async fn refresh(&self, lock: &Lock) -> Result<Lock, LockError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();

        let stored = guard
            .get_mut(&lock.key)
            .ok_or_else(|| LockError::NotFound { key: lock.key.clone() })?;
        if stored.id != lock.id {
            return Err(LockError::InvalidLockId { key: lock.key.clone() });
        }
        if stored.is_expired(now) {
            return Err(LockError::Expired { key: lock.key.clone() });
        }

        stored.expires_at = now + ChronoDuration::seconds(lock.ttl_seconds as i64);
        Ok(stored.clone())
    }

    async fn release(&self, lock: &Lock) -> Result<(), LockError> {
        let mut guard = self.inner.write().await;
        match guard.get(&lock.key) {
            Some(stored) if stored.id == lock.id => {
                guard.remove(&lock.key);
                Ok(())
            }
            Some(_) => Err(LockError::InvalidLockId { key: lock.key.clone() }),
            None => Ok(()),
        }
    }

    async fn force_release(&self, key: &str) -> Result<(), LockError> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError> {
        let guard = self.inner.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Lock>, LockError> {
        let guard = self.inner.read().await;
        Ok(guard
            .values()
            .filter(|l| l.key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn acquire_then_conflict() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", TTL, "alice").await.unwrap();
        assert_eq!(lock.owner, "alice");

        let err = mgr.acquire("k", TTL, "bob").await.unwrap_err();
        match err {
            LockError::AlreadyHeld { owner, .. } => assert_eq!(owner, "alice"),
            other => panic!("expected AlreadyHeld, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", Duration::from_secs(0), "alice").await.unwrap();
        assert!(lock.is_expired(Utc::now()));

        let taken = mgr.acquire("k", TTL, "bob").await.unwrap();
        assert_eq!(taken.owner, "bob");
        assert_ne!(taken.id, lock.id);
    }

    #[tokio::test]
    async fn refresh_extends_lease() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", TTL, "alice").await.unwrap();
        let refreshed = mgr.refresh(&lock).await.unwrap();
        assert!(refreshed.expires_at >= lock.expires_at);
        assert_eq!(refreshed.id, lock.id);
    }

    #[tokio::test]
    async fn refresh_with_wrong_id_rejected() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", TTL, "alice").await.unwrap();
        let forged = Lock { id: Uuid::new_v4(), ..lock };
        assert!(matches!(
            mgr.refresh(&forged).await,
            Err(LockError::InvalidLockId { .. })
        ));
    }

    #[tokio::test]
    async fn refresh_after_expiry_fails() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", Duration::from_secs(0), "alice").await.unwrap();
        assert!(matches!(
            mgr.refresh(&lock).await,
            Err(LockError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn release_requires_matching_id() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", TTL, "alice").await.unwrap();

        let forged = Lock { id: Uuid::new_v4(), ..lock.clone() };
        assert!(matches!(
            mgr.release(&forged).await,
            Err(LockError::InvalidLockId { .. })
        ));

        mgr.release(&lock).await.unwrap();
        assert!(mgr.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_of_absent_lock_is_ok() {
        let mgr = MemoryLockManager::new();
        let lock = mgr.acquire("k", TTL, "alice").await.unwrap();
        mgr.force_release("k").await.unwrap();
        // The holder releasing after an admin force-release is not an error.
        mgr.release(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let mgr = MemoryLockManager::new();
        mgr.acquire("tenants/t-1:stack:a:dev", TTL, "x").await.unwrap();
        mgr.acquire("tenants/t-1:stack:b:dev", TTL, "x").await.unwrap();
        mgr.acquire("tenants/t-2:stack:c:dev", TTL, "x").await.unwrap();

        let locks = mgr.list("tenants/t-1").await.unwrap();
        assert_eq!(locks.len(), 2);
    }
}
