use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strato_domain::Kind;

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

// ── Nested config records ────────────────────────────────────────────────────

/// Stored credential material. The hash never leaves the registry; only a
/// plaintext secret supplied at login is compared against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub hash: String,
    pub algorithm: String,
    pub rotations: u32,
    pub last_rotated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root prefix owned by this tenant (`tenants/<id>`).
    pub prefix: String,
    /// State layout version segment.
    pub version: String,
    /// Full state path: `<prefix>/<version>`. State keys live below it.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocksConfig {
    /// Prefix every lock key of this tenant must carry.
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AwsConfig {
    pub account: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assume_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkingConfig {
    #[serde(default)]
    pub vpc_cidr: Option<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLimits {
    pub max_stacks: u32,
    pub max_resources_per_stack: u32,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self { max_stacks: 25, max_resources_per_stack: 200 }
    }
}

// ── Tenant ───────────────────────────────────────────────────────────────────

/// An authenticated principal with an isolated state prefix, lock namespace,
/// and quota set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    /// Login name; unique in the registry, follows the stack naming rule.
    pub name: String,
    pub display_name: String,
    pub email: String,
    pub status: TenantStatus,
    pub credentials: Credentials,
    pub storage: StorageConfig,
    pub locks: LocksConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub networking: NetworkingConfig,
    #[serde(default)]
    pub limits: TenantLimits,
    /// Tags stamped onto every resource the tenant applies.
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    /// Kinds this tenant may provision. Empty means all.
    #[serde(default)]
    pub allowed_resources: Vec<Kind>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn allows_kind(&self, kind: Kind) -> bool {
        self.allowed_resources.is_empty() || self.allowed_resources.contains(&kind)
    }
}
