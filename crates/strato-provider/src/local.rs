use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use strato_domain::{Arn, Component, Kind};

use crate::error::{ProviderError, ProviderErrorKind};
use crate::provider::{ResourceOptions, ResourceProvider, ResourceResult, ResourceState};

const LOCAL_ACCOUNT: &str = "000000000000";

#[derive(Debug, Clone)]
struct CloudResource {
    kind: Kind,
    name: String,
    attributes: serde_json::Value,
    outputs: BTreeMap<String, String>,
}

/// A provider that simulates a cloud in process memory.
///
/// - Assigns synthetic ids and ARN-shaped outputs per kind.
/// - Remembers created resources so `exists`/`read`/`delete` behave.
/// - Performs no actual I/O.
#[derive(Debug, Default, Clone)]
pub struct LocalProvider {
    resources: Arc<RwLock<HashMap<String, CloudResource>>>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a resource without going through `delete`, simulating an
    /// operator mutating the cloud out-of-band. Drift detection relies on it.
    pub async fn remove_out_of_band(&self, id: &str) -> bool {
        self.resources.write().await.remove(id).is_some()
    }

    /// Overwrite one live output value out-of-band.
    pub async fn mutate_output(&self, id: &str, key: &str, value: &str) -> bool {
        let mut guard = self.resources.write().await;
        match guard.get_mut(id) {
            Some(res) => {
                res.outputs.insert(key.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn resource_count(&self) -> usize {
        self.resources.read().await.len()
    }

    fn synthesize_outputs(
        component: &Component,
        opts: &ResourceOptions,
        id: &str,
    ) -> BTreeMap<String, String> {
        let kind = component.kind();
        let name = component.resource_name();
        let arn = Arn::new(kind, &opts.region, LOCAL_ACCOUNT, &name).to_string();

        let mut outputs = BTreeMap::new();
        match kind {
            Kind::Bucket => {
                outputs.insert("bucket_name".into(), name.clone());
                outputs.insert("arn".into(), arn);
            }
            Kind::Table => {
                outputs.insert("table_name".into(), name.clone());
                outputs.insert("arn".into(), arn);
            }
            Kind::Queue => {
                outputs.insert(
                    "queue_url".into(),
                    format!("local://sqs/{}/{}", opts.tenant_id, name),
                );
                outputs.insert("arn".into(), arn);
            }
            Kind::Topic => {
                outputs.insert("topic_arn".into(), arn);
            }
            Kind::Function => {
                outputs.insert("function_name".into(), name.clone());
                outputs.insert("arn".into(), arn);
            }
            Kind::Database => {
                outputs.insert(
                    "endpoint".into(),
                    format!("{}.db.{}.local", name, opts.region),
                );
                outputs.insert("arn".into(), arn);
            }
            Kind::Service => {
                outputs.insert("service_name".into(), name.clone());
                outputs.insert(
                    "hostname".into(),
                    format!("{}.{}.svc.local", name, opts.stack),
                );
            }
            Kind::Vpc => {
                outputs.insert("vpc_id".into(), id.to_string());
            }
            Kind::Subnet => {
                outputs.insert("subnet_id".into(), id.to_string());
            }
            Kind::InternetGateway => {
                outputs.insert("gateway_id".into(), id.to_string());
            }
            Kind::NatGateway => {
                outputs.insert("nat_gateway_id".into(), id.to_string());
            }
            Kind::SecurityGroup => {
                outputs.insert("security_group_id".into(), id.to_string());
            }
            Kind::RouteTable => {
                outputs.insert("route_table_id".into(), id.to_string());
            }
        }
        outputs.insert("name".into(), name);
        outputs
    }

    fn result(id: &str, kind: Kind, res: &CloudResource) -> ResourceResult {
        ResourceResult {
            id: id.to_string(),
            kind,
            status: ResourceState::Available,
            outputs: res.outputs.clone(),
            metadata: json!({
                "provider": "local",
                "name": res.name,
                "attributes": res.attributes,
            }),
            timestamp: Utc::now(),
        }
    }

    fn not_found(operation: &str, id: &str) -> ProviderError {
        ProviderError::new(
            "local",
            operation,
            id,
            "resource does not exist",
            ProviderErrorKind::NotFound,
        )
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create(
        &self,
        resource: &Component,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError> {
        let kind = resource.kind();
        let id = format!(
            "local-{}-{}",
            kind.aws_service(),
            Uuid::new_v4().simple()
        );
        debug!(id = %id, kind = %kind, name = %resource.metadata.name, "LocalProvider: create");

        let stored = CloudResource {
            kind,
            name: resource.resource_name(),
            attributes: resource.spec.to_value(),
            outputs: Self::synthesize_outputs(resource, opts, &id),
        };
        let result = Self::result(&id, kind, &stored);
        self.resources.write().await.insert(id, stored);
        Ok(result)
    }

    async fn read(
        &self,
        id: &str,
        _opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError> {
        let guard = self.resources.read().await;
        let res = guard.get(id).ok_or_else(|| Self::not_found("read", id))?;
        Ok(Self::result(id, res.kind, res))
    }

    async fn update(
        &self,
        id: &str,
        resource: &Component,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError> {
        debug!(id = %id, name = %resource.metadata.name, "LocalProvider: update");
        let mut guard = self.resources.write().await;
        let res = guard.get_mut(id).ok_or_else(|| Self::not_found("update", id))?;
        res.attributes = resource.spec.to_value();
        res.name = resource.resource_name();
        res.outputs = Self::synthesize_outputs(resource, opts, id);
        Ok(Self::result(id, res.kind, res))
    }

    async fn delete(
        &self,
        id: &str,
        _opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError> {
        debug!(id = %id, "LocalProvider: delete");
        let mut guard = self.resources.write().await;
        let res = guard.remove(id).ok_or_else(|| Self::not_found("delete", id))?;
        Ok(ResourceResult {
            id: id.to_string(),
            kind: res.kind,
            status: ResourceState::Deleted,
            outputs: BTreeMap::new(),
            metadata: json!({ "provider": "local" }),
            timestamp: Utc::now(),
        })
    }

    async fn exists(&self, id: &str, _opts: &ResourceOptions) -> Result<bool, ProviderError> {
        Ok(self.resources.read().await.contains_key(id))
    }

    async fn get_outputs(
        &self,
        id: &str,
        _opts: &ResourceOptions,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let guard = self.resources.read().await;
        let res = guard.get(id).ok_or_else(|| Self::not_found("get_outputs", id))?;
        Ok(res.outputs.clone())
    }
}
