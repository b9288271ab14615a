use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LockError;
use crate::lock::{Lock, LockManager};

/// Wraps a raw lock manager and enforces a tenant lock prefix on every
/// operation, mirroring the tenant-aware storage backend.
pub struct TenantAwareLockManager {
    inner: Arc<dyn LockManager>,
    prefix: String,
}

impl TenantAwareLockManager {
    pub fn new(inner: Arc<dyn LockManager>, prefix: impl Into<String>) -> Self {
        Self { inner, prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn check(&self, key: &str) -> Result<(), LockError> {
        if key.starts_with(&self.prefix) {
            Ok(())
        } else {
            Err(LockError::CrossTenant {
                key: key.to_string(),
                prefix: self.prefix.clone(),
            })
        }
    }
}

#[async_trait]
impl LockManager for TenantAwareLockManager {
    async fn acquire(
        &self,
        key: &str,
        ttl: std::time::Duration,
        owner: &str,
    ) -> Result<Lock, LockError> {
        self.check(key)?;
        self.inner.acquire(key, ttl, owner).await
    }

    async fn refresh(&self, lock: &Lock) -> Result<Lock, LockError> {
        self.check(&lock.key)?;
        self.inner.refresh(lock).await
    }

    async fn release(&self, lock: &Lock) -> Result<(), LockError> {
        self.check(&lock.key)?;
        self.inner.release(lock).await
    }

    async fn force_release(&self, key: &str) -> Result<(), LockError> {
        self.check(key)?;
        self.inner.force_release(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Lock>, LockError> {
        self.check(prefix)?;
        self.inner.list(prefix).await
    }
}
