use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strato_domain::{Component, Kind};

use crate::error::ProviderError;

/// Per-call context handed to every provider operation.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub tenant_id: String,
    pub stack: String,
    pub service: String,
    pub region: String,
    /// Merged tag set: tenant default tags ∪ stack labels ∪ component labels.
    pub tags: BTreeMap<String, String>,
    pub dry_run: bool,
}

/// The cloud-side lifecycle state reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Available,
    Creating,
    Deleted,
}

/// The shape every mutating or reading provider call returns.
#[derive(Debug, Clone)]
pub struct ResourceResult {
    /// Provider-assigned identifier.
    pub id: String,
    pub kind: Kind,
    pub status: ResourceState,
    /// Key/value outputs produced by the call (hostname, arn, table_name, ...).
    pub outputs: BTreeMap<String, String>,
    /// Full provider response, kept opaquely for debugging.
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// The wire-level contract a cloud implementation fulfils per resource kind.
///
/// Failures surface as [`ProviderError`]; the engine retries only those the
/// provider classifies as retryable.
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn create(
        &self,
        resource: &Component,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError>;

    async fn read(
        &self,
        id: &str,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError>;

    async fn update(
        &self,
        id: &str,
        resource: &Component,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError>;

    async fn delete(&self, id: &str, opts: &ResourceOptions)
        -> Result<ResourceResult, ProviderError>;

    async fn exists(&self, id: &str, opts: &ResourceOptions) -> Result<bool, ProviderError>;

    async fn get_outputs(
        &self,
        id: &str,
        opts: &ResourceOptions,
    ) -> Result<BTreeMap<String, String>, ProviderError>;
}
