use serde_json::{json, Value};
use strato_domain::{Component, Kind, Stack};
use strato_store::State;
use tracing::debug;

use crate::change::{AttributeChange, Change, ChangeSet, ChangeType};
use crate::flatten::flatten;

/// Attribute path prefixes that never participate in comparison.
const ALWAYS_IGNORED: [&str; 3] = ["outputs", "created_at", "updated_at"];

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Skip `labels` paths (the tag set) during comparison.
    pub ignore_tags: bool,
}

/// The attribute record a component is expected to occupy in state: the spec
/// plus its labels. The engine persists exactly this shape (with provider
/// `outputs` merged in), so an unchanged component diffs to `NoChange`.
pub fn desired_attributes(component: &Component) -> Value {
    json!({
        "spec": component.spec.to_value(),
        "labels": component.metadata.labels,
    })
}

/// Compute the change set between a parsed stack folder and its prior state.
///
/// Every desired component yields exactly one change; every state resource
/// absent from the desired set yields a `Delete`.
pub fn diff(
    stack: &Stack,
    components: &[Component],
    state: &State,
    options: &DiffOptions,
) -> ChangeSet {
    let mut changes = Vec::with_capacity(components.len());

    for comp in components {
        changes.push(diff_component(comp, state, options));
    }

    // Orphans: in state, no longer desired.
    for (name, resource) in &state.resources {
        if components.iter().any(|c| &c.metadata.name == name) {
            continue;
        }
        changes.push(Change {
            resource_name: name.clone(),
            kind: resource.kind,
            change_type: ChangeType::Delete,
            service: String::new(),
            before: Some(resource.attributes.clone()),
            after: None,
            attribute_changes: vec![],
            requires_recreate: false,
            reason: Some("no longer in desired configuration".to_string()),
        });
    }

    let set = ChangeSet {
        stack: stack.name.clone(),
        tenant: stack.tenant.clone(),
        changes,
    };
    let summary = set.summary();
    debug!(
        stack = %stack.name,
        create = summary.create,
        update = summary.update,
        delete = summary.delete,
        recreate = summary.recreate,
        no_change = summary.no_change,
        "change set computed"
    );
    set
}

fn diff_component(comp: &Component, state: &State, options: &DiffOptions) -> Change {
    let name = &comp.metadata.name;
    let after = desired_attributes(comp);

    let Some(resource) = state.resources.get(name) else {
        return Change {
            resource_name: name.clone(),
            kind: comp.kind(),
            change_type: ChangeType::Create,
            service: comp.metadata.service.clone(),
            before: None,
            after: Some(after),
            attribute_changes: vec![],
            requires_recreate: false,
            reason: None,
        };
    };

    if resource.kind != comp.kind() {
        return Change {
            resource_name: name.clone(),
            kind: comp.kind(),
            change_type: ChangeType::Recreate,
            service: comp.metadata.service.clone(),
            before: Some(resource.attributes.clone()),
            after: Some(after),
            attribute_changes: vec![],
            requires_recreate: true,
            reason: Some(format!(
                "kind changed from {} to {}",
                resource.kind,
                comp.kind()
            )),
        };
    }

    let attribute_changes =
        compare_attributes(comp.kind(), &resource.attributes, &after, options);
    let requires_recreate = attribute_changes.iter().any(|c| c.force_recreate);

    let (change_type, reason) = if attribute_changes.is_empty() {
        (ChangeType::NoChange, None)
    } else if requires_recreate {
        let forcing = attribute_changes
            .iter()
            .find(|c| c.force_recreate)
            .map(|c| c.path.clone())
            .unwrap_or_default();
        (
            ChangeType::Recreate,
            Some(format!("attribute '{}' cannot change in place", forcing)),
        )
    } else {
        (ChangeType::Update, None)
    };

    Change {
        resource_name: name.clone(),
        kind: comp.kind(),
        change_type,
        service: comp.metadata.service.clone(),
        before: Some(resource.attributes.clone()),
        after: Some(after),
        attribute_changes,
        requires_recreate,
        reason,
    }
}

fn compare_attributes(
    kind: Kind,
    before: &Value,
    after: &Value,
    options: &DiffOptions,
) -> Vec<AttributeChange> {
    let old_flat = flatten(before);
    let new_flat = flatten(after);

    let mut paths: Vec<&String> = old_flat.keys().chain(new_flat.keys()).collect();
    paths.sort();
    paths.dedup();

    let mut changes = Vec::new();
    for path in paths {
        if is_ignored(path, options) {
            continue;
        }
        let old = old_flat.get(path).cloned().unwrap_or(Value::Null);
        let new = new_flat.get(path).cloned().unwrap_or(Value::Null);
        if old == new {
            continue;
        }
        let force = forces_recreate(kind, path, &old, &new);
        changes.push(AttributeChange {
            path: path.clone(),
            old,
            new,
            force_recreate: force,
        });
    }
    changes
}

fn is_ignored(path: &str, options: &DiffOptions) -> bool {
    let head = path.split(['.', '[']).next().unwrap_or(path);
    if ALWAYS_IGNORED.contains(&head) {
        return true;
    }
    options.ignore_tags && head == "labels"
}

/// The normative recreate-forcing attribute table.
fn forces_recreate(kind: Kind, path: &str, old: &Value, new: &Value) -> bool {
    match kind {
        // ACL, versioning, expiry are all mutable in place.
        Kind::Bucket => false,
        Kind::Table => matches!(path, "spec.hash_key.name" | "spec.range_key.name"),
        Kind::Queue | Kind::Topic => path == "spec.fifo",
        Kind::Database => match path {
            "spec.engine" => true,
            // Storage can grow in place but never shrink.
            "spec.allocated_storage_gb" => match (old.as_u64(), new.as_u64()) {
                (Some(o), Some(n)) => n < o,
                _ => false,
            },
            _ => false,
        },
        Kind::Service => path == "spec.platform",
        _ => false,
    }
}
