use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use strato_domain::{Component, ComponentSpec, Kind, Metadata};
use strato_provider::{ProviderRegistry, ResourceOptions};
use strato_store::State;
use tracing::{debug, info, warn};

// ── Actions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
        }
    }
}

/// One journaled side effect. Appended in completion order during an apply;
/// rollback walks the list in reverse.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub action: ActionType,
    pub resource_name: String,
    pub resource_id: String,
    pub kind: Kind,
    pub service: String,
    /// Attribute record before the side effect (updates and deletes).
    pub before: Option<Value>,
    /// Attribute record after the side effect (creates and updates).
    pub after: Option<Value>,
    pub performed_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

// ── Rollback result ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RollbackFailure {
    pub resource_name: String,
    pub action: ActionType,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackResult {
    pub success: bool,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<RollbackFailure>,
    #[serde(skip)]
    pub duration: Duration,
}

// ── Journal ──────────────────────────────────────────────────────────────────

/// Append-only record of the side effects of one apply transaction.
///
/// `start` clones the pre-apply state so later mutations never reach the
/// snapshot. A journal entry exists for every successful side effect before
/// state persistence advances to cover it; rollback iterates the journal,
/// not state.
#[derive(Debug)]
pub struct RollbackJournal {
    stack: String,
    tenant: String,
    snapshot: State,
    actions: Vec<Action>,
}

impl RollbackJournal {
    pub fn start(stack: &str, tenant: &str, snapshot: &State) -> Self {
        Self {
            stack: stack.to_string(),
            tenant: tenant.to_string(),
            snapshot: snapshot.clone(),
            actions: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &State {
        &self.snapshot
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn record_create(
        &mut self,
        name: &str,
        service: &str,
        id: &str,
        kind: Kind,
        after: Value,
    ) {
        self.push(Action {
            action: ActionType::Create,
            resource_name: name.to_string(),
            resource_id: id.to_string(),
            kind,
            service: service.to_string(),
            before: None,
            after: Some(after),
            performed_at: Utc::now(),
            success: true,
            error: None,
        });
    }

    pub fn record_update(
        &mut self,
        name: &str,
        service: &str,
        id: &str,
        kind: Kind,
        before: Value,
        after: Value,
    ) {
        self.push(Action {
            action: ActionType::Update,
            resource_name: name.to_string(),
            resource_id: id.to_string(),
            kind,
            service: service.to_string(),
            before: Some(before),
            after: Some(after),
            performed_at: Utc::now(),
            success: true,
            error: None,
        });
    }

    pub fn record_delete(
        &mut self,
        name: &str,
        service: &str,
        id: &str,
        kind: Kind,
        before: Value,
    ) {
        self.push(Action {
            action: ActionType::Delete,
            resource_name: name.to_string(),
            resource_id: id.to_string(),
            kind,
            service: service.to_string(),
            before: Some(before),
            after: None,
            performed_at: Utc::now(),
            success: true,
            error: None,
        });
    }

    pub fn record_failure(
        &mut self,
        action: ActionType,
        name: &str,
        service: &str,
        id: &str,
        kind: Kind,
        error: &str,
    ) {
        self.push(Action {
            action,
            resource_name: name.to_string(),
            resource_id: id.to_string(),
            kind,
            service: service.to_string(),
            before: None,
            after: None,
            performed_at: Utc::now(),
            success: false,
            error: Some(error.to_string()),
        });
    }

    fn push(&mut self, action: Action) {
        debug!(
            stack = %self.stack,
            resource = %action.resource_name,
            action = %action.action,
            success = action.success,
            "journal entry"
        );
        self.actions.push(action);
    }

    /// Discard the journal after a fully successful apply.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Execute compensating actions in reverse completion order and repair
    /// `state` to match: reverted creates drop their resource entry, reverted
    /// updates restore the snapshot's entry.
    ///
    /// - `Create` compensates by deleting the created resource (skipped when
    ///   the id is empty; a not-found answer counts as already compensated).
    /// - `Update` compensates by replaying the prior spec, reconstructed from
    ///   the journaled `before` record.
    /// - `Delete` is irreversible; it is skipped and reported for operator
    ///   attention.
    /// - Unsuccessful actions performed no side effect and are skipped.
    pub async fn rollback(
        &self,
        providers: &ProviderRegistry,
        base_opts: &ResourceOptions,
        state: &mut State,
    ) -> RollbackResult {
        let started = Instant::now();
        let mut result = RollbackResult {
            success: false,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        };

        info!(
            stack = %self.stack,
            tenant = %self.tenant,
            actions = self.actions.len(),
            "rolling back"
        );

        for action in self.actions.iter().rev() {
            if !action.success {
                result.skipped_count += 1;
                continue;
            }
            let opts = ResourceOptions {
                service: action.service.clone(),
                ..base_opts.clone()
            };
            match action.action {
                ActionType::Create => {
                    self.revert_create(providers, &opts, action, state, &mut result).await
                }
                ActionType::Update => {
                    self.revert_update(providers, &opts, action, state, &mut result).await
                }
                ActionType::Delete => {
                    result.skipped_count += 1;
                    result.errors.push(RollbackFailure {
                        resource_name: action.resource_name.clone(),
                        action: ActionType::Delete,
                        error: "delete is irreversible; resource must be restored manually"
                            .to_string(),
                    });
                }
            }
        }

        result.success = result.failed_count == 0;
        result.duration = started.elapsed();
        info!(
            success = result.success,
            reverted = result.success_count,
            failed = result.failed_count,
            skipped = result.skipped_count,
            "rollback finished"
        );
        result
    }

    async fn revert_create(
        &self,
        providers: &ProviderRegistry,
        opts: &ResourceOptions,
        action: &Action,
        state: &mut State,
        result: &mut RollbackResult,
    ) {
        if action.resource_id.is_empty() {
            result.skipped_count += 1;
            return;
        }
        let provider = match providers.for_kind(action.kind) {
            Ok(p) => p,
            Err(e) => {
                result.failed_count += 1;
                result.errors.push(RollbackFailure {
                    resource_name: action.resource_name.clone(),
                    action: ActionType::Create,
                    error: e.to_string(),
                });
                return;
            }
        };
        match provider.delete(&action.resource_id, opts).await {
            Ok(_) => {
                state.resources.remove(&action.resource_name);
                state.outputs.remove(&action.resource_name);
                result.success_count += 1;
            }
            Err(e) if e.is_not_found() => {
                // Already gone; nothing left to compensate.
                state.resources.remove(&action.resource_name);
                state.outputs.remove(&action.resource_name);
                result.success_count += 1;
            }
            Err(e) => {
                warn!(resource = %action.resource_name, error = %e, "rollback delete failed");
                result.failed_count += 1;
                result.errors.push(RollbackFailure {
                    resource_name: action.resource_name.clone(),
                    action: ActionType::Create,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn revert_update(
        &self,
        providers: &ProviderRegistry,
        opts: &ResourceOptions,
        action: &Action,
        state: &mut State,
        result: &mut RollbackResult,
    ) {
        let prior = match self.reconstruct_prior(action) {
            Ok(c) => c,
            Err(message) => {
                result.failed_count += 1;
                result.errors.push(RollbackFailure {
                    resource_name: action.resource_name.clone(),
                    action: ActionType::Update,
                    error: message,
                });
                return;
            }
        };
        let provider = match providers.for_kind(action.kind) {
            Ok(p) => p,
            Err(e) => {
                result.failed_count += 1;
                result.errors.push(RollbackFailure {
                    resource_name: action.resource_name.clone(),
                    action: ActionType::Update,
                    error: e.to_string(),
                });
                return;
            }
        };
        match provider.update(&action.resource_id, &prior, opts).await {
            Ok(_) => {
                if let Some(prior_res) = self.snapshot.resources.get(&action.resource_name) {
                    state
                        .resources
                        .insert(action.resource_name.clone(), prior_res.clone());
                }
                result.success_count += 1;
            }
            Err(e) => {
                warn!(resource = %action.resource_name, error = %e, "rollback update failed");
                result.failed_count += 1;
                result.errors.push(RollbackFailure {
                    resource_name: action.resource_name.clone(),
                    action: ActionType::Update,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Rebuild the prior component from an update action's `before` record.
    fn reconstruct_prior(&self, action: &Action) -> Result<Component, String> {
        let before = action
            .before
            .as_ref()
            .ok_or_else(|| "journal entry has no before record".to_string())?;
        let spec_value = before
            .get("spec")
            .cloned()
            .ok_or_else(|| "before record has no spec".to_string())?;
        let spec = ComponentSpec::from_value(action.kind, spec_value)
            .map_err(|e| format!("prior spec does not parse: {}", e))?;
        let labels: BTreeMap<String, String> = before
            .get("labels")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        Ok(Component {
            metadata: Metadata {
                name: action.resource_name.clone(),
                stack: self.stack.clone(),
                service: action.service.clone(),
                labels,
            },
            spec,
            depends_on: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strato_domain::{BucketSpec, Versioning};
    use strato_provider::{LocalProvider, ResourceProvider};

    use super::*;

    fn bucket(name: &str, versioned: bool) -> Component {
        Component {
            metadata: Metadata {
                name: name.into(),
                stack: "orders".into(),
                service: "api".into(),
                labels: BTreeMap::new(),
            },
            spec: ComponentSpec::Bucket(BucketSpec {
                acl: "private".into(),
                versioning: Versioning { enabled: versioned },
                expiration_days: None,
            }),
            depends_on: vec![],
        }
    }

    fn attributes(comp: &Component) -> Value {
        serde_json::json!({
            "spec": comp.spec.to_value(),
            "labels": comp.metadata.labels,
        })
    }

    fn opts() -> ResourceOptions {
        ResourceOptions {
            tenant_id: "t-1".into(),
            stack: "orders".into(),
            service: String::new(),
            region: "us-east-1".into(),
            tags: BTreeMap::new(),
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn rollback_deletes_journaled_creates_in_reverse() {
        let provider = Arc::new(LocalProvider::new());
        let registry = ProviderRegistry::with_default(provider.clone());

        let a = provider.create(&bucket("a", false), &opts()).await.unwrap();
        let b = provider.create(&bucket("b", false), &opts()).await.unwrap();

        let mut state = State::new("orders", "dev", "t-1", "test");
        let mut journal = RollbackJournal::start("orders", "t-1", &state);
        journal.record_create("a", "api", &a.id, Kind::Bucket, attributes(&bucket("a", false)));
        journal.record_create("b", "api", &b.id, Kind::Bucket, attributes(&bucket("b", false)));

        let result = journal.rollback(&registry, &opts(), &mut state).await;
        assert!(result.success);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failed_count, 0);
        assert_eq!(provider.resource_count().await, 0);
    }

    #[tokio::test]
    async fn rollback_skips_empty_id_and_tolerates_not_found() {
        let provider = Arc::new(LocalProvider::new());
        let registry = ProviderRegistry::with_default(provider.clone());

        let mut state = State::new("orders", "dev", "t-1", "test");
        let mut journal = RollbackJournal::start("orders", "t-1", &state);
        journal.record_create("a", "api", "", Kind::Bucket, attributes(&bucket("a", false)));
        journal.record_create(
            "b",
            "api",
            "local-s3-gone",
            Kind::Bucket,
            attributes(&bucket("b", false)),
        );

        let result = journal.rollback(&registry, &opts(), &mut state).await;
        assert!(result.success);
        assert_eq!(result.skipped_count, 1); // empty id
        assert_eq!(result.success_count, 1); // not-found counts as compensated
    }

    #[tokio::test]
    async fn rollback_restores_prior_spec_for_updates() {
        let provider = Arc::new(LocalProvider::new());
        let registry = ProviderRegistry::with_default(provider.clone());

        let prior = bucket("a", false);
        let created = provider.create(&prior, &opts()).await.unwrap();
        let changed = bucket("a", true);
        provider.update(&created.id, &changed, &opts()).await.unwrap();

        let mut state = State::new("orders", "dev", "t-1", "test");
        let mut journal = RollbackJournal::start("orders", "t-1", &state);
        journal.record_update(
            "a",
            "api",
            &created.id,
            Kind::Bucket,
            attributes(&prior),
            attributes(&changed),
        );

        let result = journal.rollback(&registry, &opts(), &mut state).await;
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.success_count, 1);

        let live = provider.read(&created.id, &opts()).await.unwrap();
        let enabled = live.metadata["attributes"]["versioning"]["enabled"].as_bool();
        assert_eq!(enabled, Some(false), "prior versioning flag restored");
    }

    #[tokio::test]
    async fn rollback_reports_irreversible_deletes() {
        let provider = Arc::new(LocalProvider::new());
        let registry = ProviderRegistry::with_default(provider);

        let mut state = State::new("orders", "dev", "t-1", "test");
        let mut journal = RollbackJournal::start("orders", "t-1", &state);
        journal.record_delete(
            "old",
            "api",
            "local-s3-old",
            Kind::Bucket,
            attributes(&bucket("old", false)),
        );

        let result = journal.rollback(&registry, &opts(), &mut state).await;
        // Irreversible: still "successful" overall, but surfaced in errors.
        assert!(result.success);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("irreversible"));
    }

    #[tokio::test]
    async fn rollback_skips_failed_actions() {
        let provider = Arc::new(LocalProvider::new());
        let registry = ProviderRegistry::with_default(provider);

        let mut state = State::new("orders", "dev", "t-1", "test");
        let mut journal = RollbackJournal::start("orders", "t-1", &state);
        journal.record_failure(
            ActionType::Create,
            "broken",
            "api",
            "",
            Kind::Bucket,
            "simulated failure",
        );

        let result = journal.rollback(&registry, &opts(), &mut state).await;
        assert!(result.success);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.success_count, 0);
    }

    #[test]
    fn clear_discards_actions_but_keeps_snapshot() {
        let state = State::new("orders", "dev", "t-1", "test");
        let mut journal = RollbackJournal::start("orders", "t-1", &state);
        journal.record_create("a", "api", "id", Kind::Bucket, Value::Null);
        journal.clear();
        assert!(journal.actions().is_empty());
        assert_eq!(journal.snapshot().metadata.stack, "orders");
    }
}
