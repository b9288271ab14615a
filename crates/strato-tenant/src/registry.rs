use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strato_domain::{validate_name, Kind};
use strato_store::StorageBackend;
use tracing::{debug, info};
use uuid::Uuid;

use crate::credentials::{generate_secret, hash_secret, verify_secret, ALGORITHM};
use crate::error::TenantError;
use crate::tenant::{
    AwsConfig, Credentials, LocksConfig, NetworkingConfig, StorageConfig, Tenant, TenantLimits,
    TenantStatus,
};

/// The registry document lives at a fixed key at the backend root.
pub const REGISTRY_KEY: &str = "tenants.yaml";

const REGISTRY_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// State layout version stamped into new tenants' storage paths.
    pub state_version: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { state_version: "v1".to_string() }
    }
}

/// The single strongly-consistent tenant document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: String,
    pub metadata: RegistryMetadata,
    #[serde(default)]
    pub config: RegistryConfig,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
}

impl Registry {
    fn empty() -> Self {
        let now = Utc::now();
        Self {
            version: REGISTRY_VERSION.to_string(),
            metadata: RegistryMetadata { created_at: now, updated_at: now },
            config: RegistryConfig::default(),
            tenants: Vec::new(),
        }
    }

    pub fn tenant_by_id(&self, id: &str) -> Option<&Tenant> {
        self.tenants.iter().find(|t| t.id == id)
    }

    pub fn tenant_by_name(&self, name: &str) -> Option<&Tenant> {
        self.tenants.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateTenantRequest {
    pub name: String,
    pub display_name: String,
    pub email: String,
    pub aws: AwsConfig,
    pub networking: NetworkingConfig,
    pub limits: Option<TenantLimits>,
    pub default_tags: BTreeMap<String, String>,
    pub allowed_resources: Vec<Kind>,
}

/// Tenant CRUD and credential verification over the registry document.
///
/// Mutating operations read the document, modify it, and write it back; the
/// backend's atomic put keeps readers consistent.
#[derive(Clone)]
pub struct TenantRegistry {
    backend: Arc<dyn StorageBackend>,
}

impl TenantRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn load(&self) -> Result<Registry, TenantError> {
        match self.backend.get(REGISTRY_KEY).await? {
            Some(bytes) => {
                let registry: Registry = serde_yaml::from_slice(&bytes)?;
                Ok(registry)
            }
            None => Ok(Registry::empty()),
        }
    }

    pub async fn save(&self, registry: &Registry) -> Result<(), TenantError> {
        let mut stamped = registry.clone();
        stamped.metadata.updated_at = Utc::now();
        let bytes = serde_yaml::to_string(&stamped)?;
        self.backend.put(REGISTRY_KEY, bytes.as_bytes()).await?;
        Ok(())
    }

    /// Create a tenant. Returns the record and the plaintext secret; this is
    /// the only time the plaintext is ever visible.
    pub async fn create(
        &self,
        req: CreateTenantRequest,
    ) -> Result<(Tenant, String), TenantError> {
        if !validate_name(&req.name) {
            return Err(TenantError::InvalidName(req.name));
        }

        let mut registry = self.load().await?;
        if registry.tenant_by_name(&req.name).is_some() {
            return Err(TenantError::Duplicate(req.name));
        }

        let id = format!("t-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let secret = generate_secret(&req.name);
        let hash = hash_secret(&secret)?;

        let prefix = format!("tenants/{}", id);
        let version = registry.config.state_version.clone();
        let tenant = Tenant {
            id: id.clone(),
            name: req.name,
            display_name: req.display_name,
            email: req.email,
            status: TenantStatus::Active,
            credentials: Credentials {
                hash,
                algorithm: ALGORITHM.to_string(),
                rotations: 0,
                last_rotated: Utc::now(),
            },
            storage: StorageConfig {
                path: format!("{}/{}", prefix, version),
                prefix,
                version,
            },
            locks: LocksConfig { prefix: format!("tenants/{}", id) },
            aws: req.aws,
            networking: req.networking,
            limits: req.limits.unwrap_or_default(),
            default_tags: req.default_tags,
            allowed_resources: req.allowed_resources,
        };

        registry.tenants.push(tenant.clone());
        self.save(&registry).await?;
        info!(tenant_id = %id, name = %tenant.name, "tenant created");
        Ok((tenant, secret))
    }

    /// Install a fresh secret. Returns the new plaintext exactly once.
    pub async fn rotate(&self, id: &str) -> Result<String, TenantError> {
        let mut registry = self.load().await?;
        let tenant = registry
            .tenants
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;

        let secret = generate_secret(&tenant.name);
        tenant.credentials.hash = hash_secret(&secret)?;
        tenant.credentials.algorithm = ALGORITHM.to_string();
        tenant.credentials.rotations += 1;
        tenant.credentials.last_rotated = Utc::now();
        let name = tenant.name.clone();

        self.save(&registry).await?;
        info!(tenant_id = %id, name = %name, "credentials rotated");
        Ok(secret)
    }

    pub async fn suspend(&self, id: &str) -> Result<(), TenantError> {
        self.set_status(id, TenantStatus::Suspended).await
    }

    pub async fn activate(&self, id: &str) -> Result<(), TenantError> {
        self.set_status(id, TenantStatus::Active).await
    }

    /// Soft-delete: the record stays in the registry (its storage prefix may
    /// still hold state) but can never verify again.
    pub async fn delete(&self, id: &str) -> Result<(), TenantError> {
        self.set_status(id, TenantStatus::Deleted).await
    }

    async fn set_status(&self, id: &str, status: TenantStatus) -> Result<(), TenantError> {
        let mut registry = self.load().await?;
        let tenant = registry
            .tenants
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        tenant.status = status;
        self.save(&registry).await?;
        info!(tenant_id = %id, status = %status, "tenant status changed");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Tenant, TenantError> {
        let registry = self.load().await?;
        registry
            .tenant_by_id(id)
            .cloned()
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    /// Verify a login. The stored hash never leaves this function; the
    /// supplied plaintext is compared against it in place.
    pub async fn verify(&self, name: &str, plaintext: &str) -> Result<Tenant, TenantError> {
        let registry = self.load().await?;
        let tenant = registry
            .tenant_by_name(name)
            .ok_or(TenantError::InvalidCredentials)?;

        if !verify_secret(plaintext, &tenant.credentials.hash)? {
            debug!(name, "credential verification failed");
            return Err(TenantError::InvalidCredentials);
        }
        match tenant.status {
            TenantStatus::Active => Ok(tenant.clone()),
            TenantStatus::Suspended => Err(TenantError::Suspended(tenant.id.clone())),
            TenantStatus::Deleted => Err(TenantError::Deleted(tenant.id.clone())),
        }
    }
}
