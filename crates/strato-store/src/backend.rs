use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// A raw key→blob store. Implementations must make `put` atomic: a reader
/// never observes a partially written value at `key`.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Wraps a raw backend and enforces a tenant prefix on every operation.
///
/// A key outside the prefix is a programming error upstream and fails loudly
/// rather than silently touching another tenant's data.
pub struct TenantAwareBackend {
    inner: Arc<dyn StorageBackend>,
    prefix: String,
}

impl TenantAwareBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self { inner, prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if key.starts_with(&self.prefix) {
            Ok(())
        } else {
            Err(StoreError::CrossTenant {
                key: key.to_string(),
                prefix: self.prefix.clone(),
            })
        }
    }
}

#[async_trait]
impl StorageBackend for TenantAwareBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.put(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check(prefix)?;
        self.inner.list(prefix).await
    }
}
