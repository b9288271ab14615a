use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use strato_domain::Kind;
use strato_provider::{ProviderRegistry, ResourceOptions};
use strato_store::State;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Live resource matches stored state.
    None,
    /// Live resource exists but differs.
    Modified,
    /// Resource was deleted out-of-band.
    Deleted,
    /// The provider could not answer (error or timeout).
    Unknown,
}

/// One attribute that differs between stored state and the live cloud.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftDiff {
    pub attribute: String,
    pub stored: Value,
    pub actual: Value,
    /// Values are redacted when the attribute looks like a secret.
    pub sensitive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftResult {
    pub resource_name: String,
    pub kind: Kind,
    pub resource_id: String,
    pub status: DriftStatus,
    #[serde(default)]
    pub diffs: Vec<DriftDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriftSummary {
    pub total: usize,
    pub clean: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unknown: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub stack: String,
    pub environment: String,
    pub tenant: String,
    pub results: Vec<DriftResult>,
    pub summary: DriftSummary,
    pub generated_at: DateTime<Utc>,
    #[serde(skip)]
    pub duration: Duration,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        self.summary.modified > 0 || self.summary.deleted > 0
    }
}

#[derive(Debug, Clone)]
pub struct DriftOptions {
    /// Output keys skipped during comparison.
    pub ignored_attributes: Vec<String>,
    /// Budget per resource check.
    pub check_timeout: Duration,
}

impl Default for DriftOptions {
    fn default() -> Self {
        Self {
            ignored_attributes: vec![
                "created_at".to_string(),
                "updated_at".to_string(),
                "tags".to_string(),
            ],
            check_timeout: Duration::from_secs(30),
        }
    }
}

/// Compare every state resource against the live cloud. Never writes state.
pub async fn detect_drift(
    state: &State,
    providers: &ProviderRegistry,
    base_opts: &ResourceOptions,
    options: &DriftOptions,
) -> DriftReport {
    let started = Instant::now();
    let mut results = Vec::with_capacity(state.resources.len());
    let mut summary = DriftSummary { total: state.resources.len(), ..Default::default() };

    for (name, resource) in &state.resources {
        let result = check_resource(name, resource, providers, base_opts, options).await;
        match result.status {
            DriftStatus::None => summary.clean += 1,
            DriftStatus::Modified => summary.modified += 1,
            DriftStatus::Deleted => summary.deleted += 1,
            DriftStatus::Unknown => {
                summary.unknown += 1;
                summary.errors += 1;
            }
        }
        results.push(result);
    }

    info!(
        stack = %state.metadata.stack,
        total = summary.total,
        clean = summary.clean,
        modified = summary.modified,
        deleted = summary.deleted,
        unknown = summary.unknown,
        "drift detection finished"
    );
    DriftReport {
        stack: state.metadata.stack.clone(),
        environment: state.metadata.environment.clone(),
        tenant: state.metadata.tenant.clone(),
        results,
        summary,
        generated_at: Utc::now(),
        duration: started.elapsed(),
    }
}

async fn check_resource(
    name: &str,
    resource: &strato_store::StateResource,
    providers: &ProviderRegistry,
    base_opts: &ResourceOptions,
    options: &DriftOptions,
) -> DriftResult {
    let mut result = DriftResult {
        resource_name: name.to_string(),
        kind: resource.kind,
        resource_id: resource.id.clone(),
        status: DriftStatus::Unknown,
        diffs: vec![],
        error: None,
    };

    let provider = match providers.for_kind(resource.kind) {
        Ok(p) => p,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };

    let exists = tokio::time::timeout(
        options.check_timeout,
        provider.exists(&resource.id, base_opts),
    )
    .await;
    match exists {
        Err(_) => {
            result.error = Some("drift check timed out".to_string());
            return result;
        }
        Ok(Err(e)) => {
            warn!(resource = name, error = %e, "drift exists check failed");
            result.error = Some(e.to_string());
            return result;
        }
        Ok(Ok(false)) => {
            result.status = DriftStatus::Deleted;
            return result;
        }
        Ok(Ok(true)) => {}
    }

    let live = tokio::time::timeout(
        options.check_timeout,
        provider.read(&resource.id, base_opts),
    )
    .await;
    let live = match live {
        Err(_) => {
            result.error = Some("drift check timed out".to_string());
            return result;
        }
        Ok(Err(e)) => {
            warn!(resource = name, error = %e, "drift read failed");
            result.error = Some(e.to_string());
            return result;
        }
        Ok(Ok(r)) => r,
    };

    let stored = stored_outputs(&resource.attributes);
    result.diffs = compare_outputs(&stored, &live.outputs, options);
    result.status = if result.diffs.is_empty() {
        DriftStatus::None
    } else {
        DriftStatus::Modified
    };
    debug!(resource = name, status = ?result.status, diffs = result.diffs.len(), "drift checked");
    result
}

fn stored_outputs(attributes: &Value) -> BTreeMap<String, String> {
    attributes
        .get("outputs")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn compare_outputs(
    stored: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
    options: &DriftOptions,
) -> Vec<DriftDiff> {
    let mut keys: Vec<&String> = stored.keys().chain(actual.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut diffs = Vec::new();
    for key in keys {
        if options.ignored_attributes.iter().any(|i| i == key) {
            continue;
        }
        let old = stored.get(key);
        let new = actual.get(key);
        if old == new {
            continue;
        }
        let sensitive = is_sensitive(key);
        let render = |v: Option<&String>| -> Value {
            match (v, sensitive) {
                (None, _) => Value::Null,
                (Some(_), true) => Value::String("<redacted>".to_string()),
                (Some(s), false) => Value::String(s.clone()),
            }
        };
        diffs.push(DriftDiff {
            attribute: key.clone(),
            stored: render(old),
            actual: render(new),
            sensitive,
        });
    }
    diffs
}

fn is_sensitive(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    ["secret", "password", "token", "credential"]
        .iter()
        .any(|marker| k.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_skips_ignored_and_equal_keys() {
        let stored = BTreeMap::from([
            ("arn".to_string(), "same".to_string()),
            ("tags".to_string(), "a".to_string()),
            ("endpoint".to_string(), "old".to_string()),
        ]);
        let actual = BTreeMap::from([
            ("arn".to_string(), "same".to_string()),
            ("tags".to_string(), "b".to_string()),
            ("endpoint".to_string(), "new".to_string()),
        ]);
        let diffs = compare_outputs(&stored, &actual, &DriftOptions::default());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].attribute, "endpoint");
    }

    #[test]
    fn missing_keys_surface_as_null() {
        let stored = BTreeMap::from([("endpoint".to_string(), "x".to_string())]);
        let actual = BTreeMap::new();
        let diffs = compare_outputs(&stored, &actual, &DriftOptions::default());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].actual, Value::Null);
    }

    #[test]
    fn sensitive_values_are_redacted() {
        let stored = BTreeMap::from([("db_password".to_string(), "hunter2".to_string())]);
        let actual = BTreeMap::from([("db_password".to_string(), "hunter3".to_string())]);
        let diffs = compare_outputs(&stored, &actual, &DriftOptions::default());
        assert!(diffs[0].sensitive);
        assert_eq!(diffs[0].stored, Value::String("<redacted>".into()));
        assert_eq!(diffs[0].actual, Value::String("<redacted>".into()));
    }
}
