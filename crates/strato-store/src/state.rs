use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use strato_domain::Kind;

pub const STATE_VERSION: &str = "v1";

// ── Resource lifecycle ───────────────────────────────────────────────────────

/// The lifecycle state of a resource recorded in the state document.
///
/// Transitions:
///   Creating → Ready ↔ Updating
///   Creating | Updating → Failed
///   Ready → Deleting (removed from the document on success)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Provider call in-flight for initial creation.
    #[default]
    Creating,
    /// Last create/update succeeded; resource should exist.
    Ready,
    /// Provider call in-flight for an update.
    Updating,
    /// Provider teardown in-flight.
    Deleting,
    /// Last provider call failed.
    Failed,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Creating => "creating",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Updating => "updating",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ── State document ───────────────────────────────────────────────────────────

/// One provisioned resource as recorded after an apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    /// Provider-assigned identifier (ARN, resource id, ...).
    pub id: String,
    /// The producing component's kind. A mismatch against the desired kind
    /// forces a recreate.
    #[serde(rename = "type")]
    pub kind: Kind,
    pub name: String,
    pub provider: String,
    pub status: ResourceStatus,
    /// The applied attribute record: `{"spec": ..., "labels": ...}` plus
    /// provider outputs under `"outputs"`.
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub stack: String,
    pub environment: String,
    pub tenant: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deployed_by: String,
}

/// The durable per-stack state blob, serialized to JSON at
/// `<tenant.storage.path>/stacks/<stack>/<env>/state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub version: String,
    pub metadata: StateMetadata,
    pub resources: BTreeMap<String, StateResource>,
    pub outputs: BTreeMap<String, Value>,
    /// Flattened topological order recorded at apply time; destroy reverses
    /// it instead of guessing from kind priorities.
    #[serde(default)]
    pub apply_order: Vec<String>,
    /// SHA-256 of the canonical JSON of this document (checksum field
    /// excluded). Set on every save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl State {
    pub fn new(stack: &str, environment: &str, tenant: &str, deployed_by: &str) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            metadata: StateMetadata {
                stack: stack.to_string(),
                environment: environment.to_string(),
                tenant: tenant.to_string(),
                created_at: now,
                updated_at: now,
                deployed_by: deployed_by.to_string(),
            },
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            apply_order: Vec::new(),
            checksum: None,
            last_update: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// The storage key of a stack's state document.
pub fn state_key(storage_path: &str, stack: &str, environment: &str) -> String {
    format!(
        "{}/stacks/{}/{}/state.json",
        storage_path.trim_end_matches('/'),
        stack,
        environment
    )
}

// ── Content checksum ─────────────────────────────────────────────────────────

/// Serialize `value` to canonical JSON (object keys sorted) and return its
/// SHA-256 hex digest.
pub fn compute_checksum<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).unwrap_or(Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

/// Recursively sort JSON object keys so map field ordering doesn't affect
/// the digest.
fn sort_json_keys(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_is_tenant_scoped() {
        assert_eq!(
            state_key("tenants/t-1/v1", "orders", "dev"),
            "tenants/t-1/v1/stacks/orders/dev/state.json"
        );
        // Trailing slash on the storage path does not double up.
        assert_eq!(
            state_key("tenants/t-1/v1/", "orders", "dev"),
            "tenants/t-1/v1/stacks/orders/dev/state.json"
        );
    }

    #[test]
    fn new_state_is_empty_v1() {
        let state = State::new("orders", "dev", "t-1", "ci");
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.is_empty());
        assert!(state.checksum.is_none());
    }

    #[test]
    fn checksum_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = serde_json::json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(compute_checksum(&a), compute_checksum(&b));
    }

    #[test]
    fn checksum_differs_on_content() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(compute_checksum(&a), compute_checksum(&b));
    }
}
