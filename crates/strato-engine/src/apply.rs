use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use strato_config::{load_stack, ParseResult};
use strato_diff::{desired_attributes, diff, ChangeSet, ChangeType, DiffOptions};
use strato_domain::{Component, ComponentSpec, Kind};
use strato_graph::{destroy_priority, DependencyGraph, Stage};
use strato_lock::{lock_key, Heartbeat, LockManager, TenantAwareLockManager};
use strato_provider::{
    ProviderError, ProviderErrorKind, ProviderRegistry, ResourceOptions, ResourceProvider,
    ResourceResult,
};
use strato_store::{
    state_key, ResourceStatus, State, StateResource, StateStore, StorageBackend,
    TenantAwareBackend,
};
use strato_tenant::{Session, Tenant, TenantError, TenantRegistry};

use crate::drift::{detect_drift, DriftOptions, DriftReport};
use crate::error::EngineError;
use crate::journal::{ActionType, RollbackJournal};
use crate::plan::DeploymentPlan;
use crate::report::{ApplyOutcome, ApplyReport, DestroyReport};

const MAX_PROVIDER_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ── Options & approval gate ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub environment: String,
    /// Emit the plan and stop before executing anything.
    pub dry_run: bool,
    /// Skip the approval gate.
    pub auto_approve: bool,
    /// On failure, keep whatever succeeded instead of compensating.
    pub no_rollback: bool,
    /// Upper bound on concurrent items within a stage.
    pub max_parallel: usize,
    pub lock_ttl: Duration,
    /// Budget per provider call.
    pub provider_timeout: Duration,
    /// Caller-provided cancellation signal, checked between stages.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            dry_run: false,
            auto_approve: false,
            no_rollback: false,
            max_parallel: 8,
            lock_ttl: Duration::from_secs(300),
            provider_timeout: Duration::from_secs(600),
            cancel: None,
        }
    }
}

/// External confirmation gate, consulted when `auto_approve` is off.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn confirm(&self, change_set: &ChangeSet, plan: &DeploymentPlan) -> bool;
}

/// Approves everything. The default when no interactive surface is attached.
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn confirm(&self, _change_set: &ChangeSet, _plan: &DeploymentPlan) -> bool {
        true
    }
}

// ── Stage work plumbing ──────────────────────────────────────────────────────

/// One side effect a worker completed, in completion order.
struct CompletedAction {
    action: ActionType,
    id: String,
    cloud_name: String,
    outputs: BTreeMap<String, String>,
    before: Option<Value>,
    after: Option<Value>,
}

struct WorkMeta {
    name: String,
    service: String,
    kind: Kind,
    provider_name: &'static str,
}

type WorkerOutput = (WorkMeta, Vec<CompletedAction>, Option<ProviderError>);

enum AbortReason {
    Provider { resource: String, error: ProviderError },
    Cancelled,
    LockLost,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// The reconciliation engine: turns (desired config, prior state) into an
/// ordered sequence of provider calls with durable state and safe rollback.
pub struct Engine {
    backend: Arc<dyn StorageBackend>,
    locks: Arc<dyn LockManager>,
    providers: Arc<ProviderRegistry>,
    approver: Arc<dyn Approver>,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        locks: Arc<dyn LockManager>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self { backend, locks, providers, approver: Arc::new(AutoApprove) }
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = approver;
        self
    }

    fn tenants(&self) -> TenantRegistry {
        TenantRegistry::new(self.backend.clone())
    }

    /// Resolve the session into an active tenant record.
    async fn authorize(&self, session: &Session) -> Result<Tenant, EngineError> {
        let session_tenant = session.require_tenant(Utc::now())?;
        let tenant = self.tenants().get(&session_tenant.id).await?;
        if !tenant.is_active() {
            return Err(TenantError::Suspended(tenant.id.clone()).into());
        }
        Ok(tenant)
    }

    // ── Apply ────────────────────────────────────────────────────────────────

    pub async fn apply(
        &self,
        stack_dir: &Path,
        session: &Session,
        opts: &ApplyOptions,
    ) -> Result<ApplyReport, EngineError> {
        let started = Instant::now();

        // 1. Authenticate & authorize.
        let tenant = self.authorize(session).await?;

        // 2. Parse & validate; the stack name keys the lock.
        let parsed = load_stack(stack_dir)?;
        self.check_tenant_policy(&tenant, &parsed)?;

        // 3. Dependency graph.
        let graph = DependencyGraph::build(&parsed.components)?;

        info!(
            tenant = %tenant.id,
            stack = %parsed.stack.name,
            environment = %opts.environment,
            components = parsed.components.len(),
            "starting apply"
        );

        // 4. Acquire the stack lock and keep it refreshed.
        let locks: Arc<dyn LockManager> = Arc::new(TenantAwareLockManager::new(
            self.locks.clone(),
            tenant.locks.prefix.clone(),
        ));
        let key = lock_key(&tenant.locks.prefix, &parsed.stack.name, &opts.environment);
        let lock = locks.acquire(&key, opts.lock_ttl, &tenant.name).await?;
        let heartbeat = Heartbeat::spawn(locks.clone(), lock.clone());

        let result = self
            .apply_locked(&parsed, &graph, &tenant, opts, &heartbeat, started)
            .await;

        // 12. Release on every exit path.
        heartbeat.stop();
        if let Err(e) = locks.release(&lock).await {
            warn!(key = %lock.key, error = %e, "lock release failed");
        }
        result
    }

    fn check_tenant_policy(
        &self,
        tenant: &Tenant,
        parsed: &ParseResult,
    ) -> Result<(), EngineError> {
        for comp in &parsed.components {
            if !tenant.allows_kind(comp.kind()) {
                return Err(TenantError::KindNotAllowed {
                    tenant: tenant.id.clone(),
                    kind: comp.kind().to_string(),
                }
                .into());
            }
        }
        let limit = tenant.limits.max_resources_per_stack as usize;
        if parsed.components.len() > limit {
            return Err(TenantError::LimitExceeded {
                tenant: tenant.id.clone(),
                detail: format!(
                    "{} components exceed max_resources_per_stack={}",
                    parsed.components.len(),
                    limit
                ),
            }
            .into());
        }
        Ok(())
    }

    async fn apply_locked(
        &self,
        parsed: &ParseResult,
        graph: &DependencyGraph,
        tenant: &Tenant,
        opts: &ApplyOptions,
        heartbeat: &Heartbeat,
        started: Instant,
    ) -> Result<ApplyReport, EngineError> {
        let stack = &parsed.stack;
        let store = StateStore::new(Arc::new(TenantAwareBackend::new(
            self.backend.clone(),
            tenant.storage.prefix.clone(),
        )));
        let key = state_key(&tenant.storage.path, &stack.name, &opts.environment);

        // 5. Prior state (empty on first apply).
        let mut state = store.load(&key).await?.unwrap_or_else(|| {
            State::new(&stack.name, &opts.environment, &tenant.id, &tenant.name)
        });

        // 6. Diff & plan.
        let change_set = diff(stack, &parsed.components, &state, &DiffOptions::default());
        let stages = graph.topological_stages();
        let plan = DeploymentPlan::build(&stages, &change_set);

        let report = |outcome, created, updated, deleted, skipped, duration| ApplyReport {
            stack: stack.name.clone(),
            environment: opts.environment.clone(),
            tenant: tenant.id.clone(),
            outcome,
            plan: plan.clone(),
            diff: change_set.summary(),
            created,
            updated,
            deleted,
            skipped,
            state_key: key.clone(),
            warnings: parsed.warnings.clone(),
            duration,
        };

        // 7. Dry-run and approval gates.
        if opts.dry_run {
            return Ok(report(ApplyOutcome::DryRun, 0, 0, 0, 0, started.elapsed()));
        }
        if !opts.auto_approve && !self.approver.confirm(&change_set, &plan).await {
            info!(stack = %stack.name, "apply declined by approver");
            return Ok(report(ApplyOutcome::Declined, 0, 0, 0, 0, started.elapsed()));
        }

        // 8. Journal start: snapshot the pre-apply state.
        let mut journal = RollbackJournal::start(&stack.name, &tenant.id, &state);

        // Outputs visible to ${component:...} references: prior state first,
        // overwritten as stages complete.
        let mut outputs_by_name: HashMap<String, BTreeMap<String, String>> = state
            .resources
            .iter()
            .map(|(name, res)| (name.clone(), stored_outputs(&res.attributes)))
            .collect();

        let mut created = 0usize;
        let mut updated = 0usize;
        let mut skipped = 0usize;
        let mut abort: Option<AbortReason> = None;

        // 9. Execute stages in order.
        for stage in &stages {
            if is_cancelled(opts) {
                abort = Some(AbortReason::Cancelled);
                break;
            }
            if heartbeat.is_lost() {
                abort = Some(AbortReason::LockLost);
                break;
            }

            let outcome = self
                .run_stage(
                    stage,
                    parsed,
                    tenant,
                    opts,
                    &change_set,
                    &mut state,
                    &mut journal,
                    &mut outputs_by_name,
                )
                .await;
            created += outcome.created;
            updated += outcome.updated;
            skipped += outcome.skipped;
            if let Some((resource, error)) = outcome.failure {
                abort = Some(AbortReason::Provider { resource, error });
                break;
            }
        }

        if let Some(reason) = abort {
            return Err(self
                .abort_apply(reason, &store, &key, &mut state, &journal, tenant, stack, opts)
                .await);
        }

        // 10. Delete resources that left the desired set. Forward-only.
        let mut deleted = 0usize;
        let mut warnings = parsed.warnings.clone();
        for change in &change_set.changes {
            if change.change_type != ChangeType::Delete {
                continue;
            }
            match self.delete_resource(&change.resource_name, &mut state, tenant, stack, opts).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(resource = %change.resource_name, error = %e, "delete failed");
                    warnings.push(format!("delete of '{}' failed: {}", change.resource_name, e));
                }
            }
        }

        // 11. Persist exactly once, only when something changed.
        if created + updated + deleted > 0 {
            state.apply_order = graph.flattened_order();
            let now = Utc::now();
            state.metadata.updated_at = now;
            state.last_update = now;
            if state.is_empty() {
                store.delete(&key).await?;
            } else {
                store.save(&key, &state).await?;
            }
        }
        journal.clear();

        info!(
            stack = %stack.name,
            created, updated, deleted, skipped,
            "apply complete"
        );
        let mut done = report(
            ApplyOutcome::Applied,
            created,
            updated,
            deleted,
            skipped,
            started.elapsed(),
        );
        done.warnings = warnings;
        Ok(done)
    }

    /// Dispatch one stage's items on a bounded worker pool and fold results
    /// in completion order. The first failure aborts in-flight siblings;
    /// completed siblings are still journaled.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        stage: &Stage,
        parsed: &ParseResult,
        tenant: &Tenant,
        opts: &ApplyOptions,
        change_set: &ChangeSet,
        state: &mut State,
        journal: &mut RollbackJournal,
        outputs_by_name: &mut HashMap<String, BTreeMap<String, String>>,
    ) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let mut work = Vec::new();

        for name in &stage.components {
            let Some(change) = change_set.change_for(name) else { continue };
            match change.change_type {
                ChangeType::NoChange => outcome.skipped += 1,
                ChangeType::Delete => {} // handled after all stages
                ChangeType::Create | ChangeType::Update | ChangeType::Recreate => {
                    let Some(comp) = parsed.component(name) else { continue };
                    work.push((comp.clone(), change.change_type));
                }
            }
        }
        if work.is_empty() {
            return outcome;
        }

        debug!(stage = stage.number, items = work.len(), "dispatching stage");
        let limit = opts.max_parallel.min(work.len()).max(1);
        let mut queue = work.into_iter();
        let mut set: JoinSet<WorkerOutput> = JoinSet::new();

        for _ in 0..limit {
            if let Some((comp, action)) = queue.next() {
                self.spawn_item(&mut set, comp, action, state, outputs_by_name, tenant, parsed, opts);
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((meta, actions, error)) => {
                    fold_completions(&meta, actions, state, journal, outputs_by_name, &mut outcome);
                    match error {
                        Some(e) => {
                            journal.record_failure(
                                action_type_for(&e),
                                &meta.name,
                                &meta.service,
                                &e.resource_id,
                                meta.kind,
                                &e.to_string(),
                            );
                            if outcome.failure.is_none() {
                                outcome.failure = Some((meta.name.clone(), e));
                                set.abort_all();
                            }
                        }
                        None if outcome.failure.is_none() => {
                            if let Some((comp, action)) = queue.next() {
                                self.spawn_item(
                                    &mut set,
                                    comp,
                                    action,
                                    state,
                                    outputs_by_name,
                                    tenant,
                                    parsed,
                                    opts,
                                );
                            }
                        }
                        None => {}
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if outcome.failure.is_none() {
                        outcome.failure = Some((
                            "<worker>".to_string(),
                            ProviderError::new(
                                "engine",
                                "join",
                                "",
                                join_err.to_string(),
                                ProviderErrorKind::Internal,
                            ),
                        ));
                        set.abort_all();
                    }
                }
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_item(
        &self,
        set: &mut JoinSet<WorkerOutput>,
        comp: Component,
        action: ChangeType,
        state: &State,
        outputs_by_name: &HashMap<String, BTreeMap<String, String>>,
        tenant: &Tenant,
        parsed: &ParseResult,
        opts: &ApplyOptions,
    ) {
        let name = comp.metadata.name.clone();
        let service = comp.metadata.service.clone();
        let kind = comp.kind();
        let prior = state.resources.get(&name);
        let prior_id = prior.map(|r| r.id.clone()).filter(|id| !id.is_empty());
        let before = prior.map(|r| r.attributes.clone());
        let resource_opts = build_opts(tenant, parsed, &comp, opts);
        let timeout = opts.provider_timeout;
        let unresolved_attrs = desired_attributes(&comp);
        let resolved = resolve_output_refs(&comp, outputs_by_name);
        let provider = self.providers.for_kind(kind);

        set.spawn(async move {
            let meta = WorkMeta {
                name: name.clone(),
                service,
                kind,
                provider_name: "",
            };
            let provider = match provider {
                Ok(p) => p,
                Err(e) => return (meta, vec![], Some(e)),
            };
            let meta = WorkMeta { provider_name: provider.name(), ..meta };
            let comp = match resolved {
                Ok(c) => c,
                Err(e) => return (meta, vec![], Some(e)),
            };
            let (actions, error) = execute_item(
                provider.as_ref(),
                &comp,
                unresolved_attrs,
                action,
                prior_id,
                before,
                &resource_opts,
                timeout,
            )
            .await;
            (meta, actions, error)
        });
    }

    /// Handle a failed or interrupted apply: compensate via the journal
    /// (unless disabled), persist whatever survived, and build the terminal
    /// error. Secondary failures are logged, never allowed to mask the cause.
    #[allow(clippy::too_many_arguments)]
    async fn abort_apply(
        &self,
        reason: AbortReason,
        store: &StateStore,
        key: &str,
        state: &mut State,
        journal: &RollbackJournal,
        tenant: &Tenant,
        stack: &strato_domain::Stack,
        opts: &ApplyOptions,
    ) -> EngineError {
        let rollback = match &reason {
            AbortReason::LockLost => None, // lease gone; do not issue more calls
            _ if opts.no_rollback => None,
            _ => {
                let base_opts = ResourceOptions {
                    tenant_id: tenant.id.clone(),
                    stack: stack.name.clone(),
                    service: String::new(),
                    region: stack.region.clone(),
                    tags: BTreeMap::new(),
                    dry_run: false,
                };
                Some(journal.rollback(&self.providers, &base_opts, state).await)
            }
        };

        let now = Utc::now();
        state.metadata.updated_at = now;
        state.last_update = now;
        let persist = if state.is_empty() {
            store.delete(key).await
        } else {
            store.save(key, state).await.map(|_| ())
        };
        if let Err(e) = persist {
            warn!(key, error = %e, "failed to persist partial state");
        }

        match reason {
            AbortReason::Provider { resource, error } => EngineError::ApplyFailed {
                resource,
                source: error,
                rollback,
                state_key: key.to_string(),
            },
            AbortReason::Cancelled => EngineError::Cancelled { stack: stack.name.clone() },
            AbortReason::LockLost => EngineError::LockLost { stack: stack.name.clone() },
        }
    }

    async fn delete_resource(
        &self,
        name: &str,
        state: &mut State,
        tenant: &Tenant,
        stack: &strato_domain::Stack,
        opts: &ApplyOptions,
    ) -> Result<(), ProviderError> {
        let Some(resource) = state.resources.get(name).cloned() else {
            return Ok(());
        };
        let provider = self.providers.for_kind(resource.kind)?;
        let resource_opts = ResourceOptions {
            tenant_id: tenant.id.clone(),
            stack: stack.name.clone(),
            service: String::new(),
            region: stack.region.clone(),
            tags: BTreeMap::new(),
            dry_run: false,
        };
        if !resource.id.is_empty() {
            let result = call_with_retry(opts.provider_timeout, || {
                provider.delete(&resource.id, &resource_opts)
            })
            .await;
            match result {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(resource = name, "already absent in cloud");
                }
                Err(e) => return Err(e),
            }
        }
        state.resources.remove(name);
        state.outputs.remove(name);
        Ok(())
    }

    // ── Destroy ──────────────────────────────────────────────────────────────

    /// Tear down a stack from its recorded state: reverse the apply order
    /// persisted at apply time, falling back to the kind priority table for
    /// resources that predate the recording. Forward-only.
    pub async fn destroy(
        &self,
        stack_name: &str,
        session: &Session,
        opts: &ApplyOptions,
    ) -> Result<DestroyReport, EngineError> {
        let started = Instant::now();
        let tenant = self.authorize(session).await?;

        let locks: Arc<dyn LockManager> = Arc::new(TenantAwareLockManager::new(
            self.locks.clone(),
            tenant.locks.prefix.clone(),
        ));
        let key = lock_key(&tenant.locks.prefix, stack_name, &opts.environment);
        let lock = locks.acquire(&key, opts.lock_ttl, &tenant.name).await?;
        let heartbeat = Heartbeat::spawn(locks.clone(), lock.clone());

        let result = self
            .destroy_locked(stack_name, &tenant, opts, started)
            .await;

        heartbeat.stop();
        if let Err(e) = locks.release(&lock).await {
            warn!(key = %lock.key, error = %e, "lock release failed");
        }
        result
    }

    async fn destroy_locked(
        &self,
        stack_name: &str,
        tenant: &Tenant,
        opts: &ApplyOptions,
        started: Instant,
    ) -> Result<DestroyReport, EngineError> {
        let store = StateStore::new(Arc::new(TenantAwareBackend::new(
            self.backend.clone(),
            tenant.storage.prefix.clone(),
        )));
        let key = state_key(&tenant.storage.path, stack_name, &opts.environment);

        let mut report = DestroyReport {
            stack: stack_name.to_string(),
            environment: opts.environment.clone(),
            tenant: tenant.id.clone(),
            destroyed: 0,
            failed: vec![],
            state_deleted: false,
            duration: Duration::ZERO,
        };

        let Some(mut state) = store.load(&key).await? else {
            return Ok(report);
        };

        // Recorded order first (reversed); anything unrecorded falls back to
        // the kind priority table.
        let mut order: Vec<String> = state
            .apply_order
            .iter()
            .rev()
            .filter(|name| state.resources.contains_key(*name))
            .cloned()
            .collect();
        let mut unrecorded: Vec<(usize, String)> = state
            .resources
            .iter()
            .filter(|(name, _)| !order.contains(name))
            .map(|(name, res)| (destroy_priority(res.kind), name.clone()))
            .collect();
        unrecorded.sort();
        order.extend(unrecorded.into_iter().map(|(_, name)| name));

        info!(stack = stack_name, resources = order.len(), "starting destroy");
        let stack_stub = strato_domain::Stack {
            name: stack_name.to_string(),
            tenant: tenant.id.clone(),
            provider: String::new(),
            region: tenant.aws.region.clone(),
            variables: BTreeMap::new(),
            labels: BTreeMap::new(),
        };
        for name in order {
            match self
                .delete_resource(&name, &mut state, tenant, &stack_stub, opts)
                .await
            {
                Ok(()) => report.destroyed += 1,
                Err(e) => {
                    warn!(resource = %name, error = %e, "destroy failed for resource");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if state.is_empty() {
            store.delete(&key).await?;
            report.state_deleted = true;
        } else {
            let now = Utc::now();
            state.metadata.updated_at = now;
            state.last_update = now;
            let live: Vec<String> = state.resources.keys().cloned().collect();
            state.apply_order.retain(|n| live.contains(n));
            store.save(&key, &state).await?;
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    // ── Drift ────────────────────────────────────────────────────────────────

    /// Compare stored state with the live cloud. Read-only: never writes
    /// state, even when drift is found.
    pub async fn drift(
        &self,
        stack_name: &str,
        session: &Session,
        environment: &str,
        options: &DriftOptions,
    ) -> Result<DriftReport, EngineError> {
        let tenant = self.authorize(session).await?;

        let locks: Arc<dyn LockManager> = Arc::new(TenantAwareLockManager::new(
            self.locks.clone(),
            tenant.locks.prefix.clone(),
        ));
        let key = lock_key(&tenant.locks.prefix, stack_name, environment);
        let lock = locks
            .acquire(&key, Duration::from_secs(300), &tenant.name)
            .await?;

        let result = self
            .drift_locked(stack_name, &tenant, environment, options)
            .await;

        if let Err(e) = locks.release(&lock).await {
            warn!(key = %lock.key, error = %e, "lock release failed");
        }
        result
    }

    async fn drift_locked(
        &self,
        stack_name: &str,
        tenant: &Tenant,
        environment: &str,
        options: &DriftOptions,
    ) -> Result<DriftReport, EngineError> {
        let store = StateStore::new(Arc::new(TenantAwareBackend::new(
            self.backend.clone(),
            tenant.storage.prefix.clone(),
        )));
        let key = state_key(&tenant.storage.path, stack_name, environment);
        let state = store
            .load(&key)
            .await?
            .ok_or_else(|| strato_store::StoreError::NotFound(key.clone()))?;

        let base_opts = ResourceOptions {
            tenant_id: tenant.id.clone(),
            stack: stack_name.to_string(),
            service: String::new(),
            region: tenant.aws.region.clone(),
            tags: BTreeMap::new(),
            dry_run: false,
        };
        Ok(detect_drift(&state, &self.providers, &base_opts, options).await)
    }
}

// ── Stage helpers ────────────────────────────────────────────────────────────

#[derive(Default)]
struct StageOutcome {
    created: usize,
    updated: usize,
    skipped: usize,
    failure: Option<(String, ProviderError)>,
}

fn is_cancelled(opts: &ApplyOptions) -> bool {
    opts.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

fn action_type_for(error: &ProviderError) -> ActionType {
    match error.operation.as_str() {
        "update" => ActionType::Update,
        "delete" => ActionType::Delete,
        _ => ActionType::Create,
    }
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

fn build_opts(
    tenant: &Tenant,
    parsed: &ParseResult,
    comp: &Component,
    opts: &ApplyOptions,
) -> ResourceOptions {
    let mut tags = tenant.default_tags.clone();
    tags.extend(parsed.stack.labels.clone());
    if let Some(service) = parsed
        .services
        .iter()
        .find(|s| s.name == comp.metadata.service)
    {
        tags.extend(service.labels.clone());
    }
    tags.extend(comp.metadata.labels.clone());
    ResourceOptions {
        tenant_id: tenant.id.clone(),
        stack: parsed.stack.name.clone(),
        service: comp.metadata.service.clone(),
        region: parsed.stack.region.clone(),
        tags,
        dry_run: false,
    }
}

/// Substitute `${component:<name>.<output>}` tokens from accumulated sibling
/// outputs. The substituted spec goes to the provider only; state keeps the
/// unresolved form so re-apply diffs stay clean.
fn resolve_output_refs(
    comp: &Component,
    outputs_by_name: &HashMap<String, BTreeMap<String, String>>,
) -> Result<Component, ProviderError> {
    let mut value = comp.spec.to_value();
    let mut missing = None;
    rewrite_refs(&mut value, outputs_by_name, &mut missing);
    if let Some(token) = missing {
        return Err(ProviderError::new(
            "engine",
            "resolve",
            &comp.metadata.name,
            format!("unresolvable output reference ${{component:{}}}", token),
            ProviderErrorKind::Invalid,
        ));
    }
    let spec = ComponentSpec::from_value(comp.kind(), value).map_err(|e| {
        ProviderError::new(
            "engine",
            "resolve",
            &comp.metadata.name,
            e.to_string(),
            ProviderErrorKind::Invalid,
        )
    })?;
    Ok(Component {
        metadata: comp.metadata.clone(),
        spec,
        depends_on: comp.depends_on.clone(),
    })
}

fn rewrite_refs(
    value: &mut Value,
    outputs_by_name: &HashMap<String, BTreeMap<String, String>>,
    missing: &mut Option<String>,
) {
    match value {
        Value::String(s) => {
            const MARKER: &str = "${component:";
            let mut result = String::with_capacity(s.len());
            let mut rest = s.as_str();
            while let Some(start) = rest.find(MARKER) {
                let after = &rest[start + MARKER.len()..];
                let Some(end) = after.find('}') else { break };
                result.push_str(&rest[..start]);
                let token = &after[..end];
                rest = &after[end + 1..];

                let resolved = token.split_once('.').and_then(|(name, output)| {
                    outputs_by_name.get(name).and_then(|o| o.get(output))
                });
                match resolved {
                    Some(val) => result.push_str(val),
                    None => {
                        if missing.is_none() {
                            *missing = Some(token.to_string());
                        }
                        return;
                    }
                }
            }
            result.push_str(rest);
            *s = result;
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| rewrite_refs(v, outputs_by_name, missing)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| rewrite_refs(v, outputs_by_name, missing)),
        _ => {}
    }
}

fn fold_completions(
    meta: &WorkMeta,
    actions: Vec<CompletedAction>,
    state: &mut State,
    journal: &mut RollbackJournal,
    outputs_by_name: &mut HashMap<String, BTreeMap<String, String>>,
    outcome: &mut StageOutcome,
) {
    if actions.is_empty() {
        return;
    }
    for completed in actions {
        match completed.action {
            ActionType::Create | ActionType::Update => {
                let after = completed.after.clone().unwrap_or(Value::Null);
                match completed.action {
                    ActionType::Create => {
                        journal.record_create(
                            &meta.name,
                            &meta.service,
                            &completed.id,
                            meta.kind,
                            after.clone(),
                        );
                        outcome.created += 1;
                    }
                    ActionType::Update => {
                        journal.record_update(
                            &meta.name,
                            &meta.service,
                            &completed.id,
                            meta.kind,
                            completed.before.clone().unwrap_or(Value::Null),
                            after.clone(),
                        );
                        outcome.updated += 1;
                    }
                    ActionType::Delete => unreachable!(),
                }

                let now = Utc::now();
                let created_at = state
                    .resources
                    .get(&meta.name)
                    .map(|r| r.created_at)
                    .unwrap_or(now);
                let mut attributes = after;
                attributes["outputs"] = serde_json::to_value(&completed.outputs)
                    .unwrap_or(Value::Null);
                state.resources.insert(
                    meta.name.clone(),
                    StateResource {
                        id: completed.id.clone(),
                        kind: meta.kind,
                        name: completed.cloud_name.clone(),
                        provider: meta.provider_name.to_string(),
                        status: ResourceStatus::Ready,
                        attributes,
                        created_at,
                        updated_at: now,
                    },
                );
                state.outputs.insert(
                    meta.name.clone(),
                    serde_json::to_value(&completed.outputs).unwrap_or(Value::Null),
                );
                outputs_by_name.insert(meta.name.clone(), completed.outputs);
            }
            ActionType::Delete => {
                // The delete half of a recreate.
                journal.record_delete(
                    &meta.name,
                    &meta.service,
                    &completed.id,
                    meta.kind,
                    completed.before.clone().unwrap_or(Value::Null),
                );
                state.resources.remove(&meta.name);
                state.outputs.remove(&meta.name);
                outputs_by_name.remove(&meta.name);
            }
        }
    }
}

// ── Worker ───────────────────────────────────────────────────────────────────

/// Execute one plan item against its provider. Returns every completed side
/// effect (journaled by the engine even when a later step fails) plus the
/// terminal error, if any.
#[allow(clippy::too_many_arguments)]
async fn execute_item(
    provider: &dyn ResourceProvider,
    comp: &Component,
    unresolved_attrs: Value,
    action: ChangeType,
    prior_id: Option<String>,
    before: Option<Value>,
    opts: &ResourceOptions,
    timeout: Duration,
) -> (Vec<CompletedAction>, Option<ProviderError>) {
    let mut actions = Vec::new();

    match action {
        ChangeType::Create => {
            // Idempotency: a prior id may survive a failed apply. If the
            // cloud still has it, there is nothing to do; if not, this is a
            // recreate-missing and we fall through to create.
            if let Some(id) = &prior_id {
                match call_with_retry(timeout, || provider.exists(id, opts)).await {
                    Ok(true) => {
                        debug!(resource = %comp.metadata.name, id = %id, "already exists; skipping");
                        return (actions, None);
                    }
                    Ok(false) => {
                        debug!(resource = %comp.metadata.name, id = %id, "missing in cloud; recreating");
                    }
                    Err(e) => return (actions, Some(e)),
                }
            }
            match call_with_retry(timeout, || provider.create(comp, opts)).await {
                Ok(result) => {
                    actions.push(created_action(&result, comp, unresolved_attrs));
                    (actions, None)
                }
                Err(e) => (actions, Some(e)),
            }
        }
        ChangeType::Update => {
            let Some(id) = prior_id else {
                // State lost the id; fall back to create.
                return match call_with_retry(timeout, || provider.create(comp, opts)).await {
                    Ok(result) => {
                        actions.push(created_action(&result, comp, unresolved_attrs));
                        (actions, None)
                    }
                    Err(e) => (actions, Some(e)),
                };
            };
            match call_with_retry(timeout, || provider.update(&id, comp, opts)).await {
                Ok(result) => {
                    actions.push(CompletedAction {
                        action: ActionType::Update,
                        id: result.id.clone(),
                        cloud_name: comp.resource_name(),
                        outputs: result.outputs,
                        before,
                        after: Some(unresolved_attrs),
                    });
                    (actions, None)
                }
                Err(e) => (actions, Some(e)),
            }
        }
        ChangeType::Recreate => {
            if let Some(id) = &prior_id {
                match call_with_retry(timeout, || provider.delete(id, opts)).await {
                    Ok(_) => actions.push(CompletedAction {
                        action: ActionType::Delete,
                        id: id.clone(),
                        cloud_name: comp.resource_name(),
                        outputs: BTreeMap::new(),
                        before: before.clone(),
                        after: None,
                    }),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return (actions, Some(e)),
                }
            }
            match call_with_retry(timeout, || provider.create(comp, opts)).await {
                Ok(result) => {
                    actions.push(created_action(&result, comp, unresolved_attrs));
                    (actions, None)
                }
                Err(e) => (actions, Some(e)),
            }
        }
        ChangeType::NoChange | ChangeType::Delete => (actions, None),
    }
}

fn created_action(
    result: &ResourceResult,
    comp: &Component,
    unresolved_attrs: Value,
) -> CompletedAction {
    CompletedAction {
        action: ActionType::Create,
        id: result.id.clone(),
        cloud_name: comp.resource_name(),
        outputs: result.outputs.clone(),
        before: None,
        after: Some(unresolved_attrs),
    }
}

/// Run a provider call with the per-call timeout, retrying throttle-class
/// failures with linear backoff.
async fn call_with_retry<T, F, Fut>(timeout: Duration, op: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match tokio::time::timeout(timeout, op()).await {
            Err(_) => {
                return Err(ProviderError::new(
                    "engine",
                    "timeout",
                    "",
                    format!("provider call exceeded {:?}", timeout),
                    ProviderErrorKind::Internal,
                ))
            }
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.retryable() && attempt < MAX_PROVIDER_ATTEMPTS => {
                debug!(attempt, error = %e, "retrying throttled provider call");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Ok(Err(e)) => return Err(e),
        }
    }
}
