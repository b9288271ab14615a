use serde::{Deserialize, Serialize};
use serde_json::Value;
use strato_domain::Kind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Recreate,
    NoChange,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
            ChangeType::Recreate => "recreate",
            ChangeType::NoChange => "no_change",
        };
        write!(f, "{}", s)
    }
}

/// One attribute-level delta between desired and applied state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Dotted path into the attribute record, list indices in brackets
    /// (`spec.versioning.enabled`, `spec.ingress[0].protocol`).
    pub path: String,
    pub old: Value,
    pub new: Value,
    /// Whether this attribute cannot change in place.
    pub force_recreate: bool,
}

/// The planned change for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub resource_name: String,
    pub kind: Kind,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(default)]
    pub attribute_changes: Vec<AttributeChange>,
    pub requires_recreate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub recreate: usize,
    pub no_change: usize,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete + self.recreate + self.no_change
    }
}

/// The ordered result of a diff: desired components in parse order, then
/// orphaned state resources.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    pub stack: String,
    pub tenant: String,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for change in &self.changes {
            match change.change_type {
                ChangeType::Create => summary.create += 1,
                ChangeType::Update => summary.update += 1,
                ChangeType::Delete => summary.delete += 1,
                ChangeType::Recreate => summary.recreate += 1,
                ChangeType::NoChange => summary.no_change += 1,
            }
        }
        summary
    }

    /// Whether the apply would perform zero provider calls.
    pub fn is_noop(&self) -> bool {
        self.changes
            .iter()
            .all(|c| c.change_type == ChangeType::NoChange)
    }

    pub fn change_for(&self, resource_name: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.resource_name == resource_name)
    }
}
