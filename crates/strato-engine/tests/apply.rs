use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use strato_domain::Component;
use strato_engine::{ApplyOptions, ApplyOutcome, Engine, EngineError};
use strato_lock::{lock_key, LockManager, MemoryLockManager};
use strato_provider::{
    LocalProvider, ProviderError, ProviderErrorKind, ProviderRegistry, ResourceOptions,
    ResourceProvider, ResourceResult,
};
use strato_store::{state_key, MemoryBackend, State, StateStore, StorageBackend};
use strato_tenant::{
    CreateTenantRequest, Session, SessionBackend, SessionLocks, SessionMode, SessionTenant,
    Tenant, TenantRegistry,
};

// ── Test environment ─────────────────────────────────────────────────────────

struct TestEnv {
    engine: Engine,
    session: Session,
    backend: MemoryBackend,
    locks: MemoryLockManager,
    tenant: Tenant,
}

impl TestEnv {
    fn state_store(&self) -> StateStore {
        StateStore::new(Arc::new(self.backend.clone()))
    }

    fn state_key(&self, stack: &str) -> String {
        state_key(&self.tenant.storage.path, stack, "dev")
    }

    async fn load_state(&self, stack: &str) -> Option<State> {
        self.state_store()
            .load(&self.state_key(stack))
            .await
            .unwrap()
    }
}

async fn setup(provider: Arc<dyn ResourceProvider>) -> TestEnv {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let backend = MemoryBackend::new();
    let locks = MemoryLockManager::new();

    let registry = TenantRegistry::new(Arc::new(backend.clone()));
    let (tenant, _secret) = registry
        .create(CreateTenantRequest {
            name: "acme".to_string(),
            display_name: "Acme Corp".to_string(),
            email: "ops@acme.test".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let session = Session {
        mode: SessionMode::Tenant,
        tenant: Some(SessionTenant {
            id: tenant.id.clone(),
            display_name: tenant.display_name.clone(),
            version: "v1".to_string(),
        }),
        backend: SessionBackend::default(),
        locks: SessionLocks::default(),
        aws: None,
        authenticated_at: Utc::now(),
        expires_at: Utc::now() + ChronoDuration::hours(1),
    };

    let engine = Engine::new(
        Arc::new(backend.clone()),
        Arc::new(locks.clone()),
        Arc::new(ProviderRegistry::with_default(provider)),
    );

    TestEnv { engine, session, backend, locks, tenant }
}

async fn setup_local() -> (TestEnv, LocalProvider) {
    let local = LocalProvider::new();
    let env = setup(Arc::new(local.clone())).await;
    (env, local)
}

fn opts() -> ApplyOptions {
    ApplyOptions { auto_approve: true, ..Default::default() }
}

// ── Stack folder fixtures ────────────────────────────────────────────────────

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn write_stack_root(root: &Path, stack: &str) {
    write(
        root,
        "stack.yaml",
        &format!(
            "apiVersion: strato.dev/v1\n\
             kind: Stack\n\
             metadata:\n  name: {stack}\n\
             spec:\n  tenant: acme\n  provider: aws\n  region: us-east-1\n"
        ),
    );
    write(
        root,
        "services/api/service.yaml",
        "apiVersion: strato.dev/v1\nkind: Service\nmetadata:\n  name: api\nspec: {}\n",
    );
}

fn bucket_yaml(versioned: bool) -> String {
    format!(
        "apiVersion: components.strato.dev/v1\n\
         kind: Bucket\n\
         metadata:\n  name: uploads\n  service: api\n\
         spec:\n  acl: private\n  versioning:\n    enabled: {versioned}\n"
    )
}

fn table_yaml(hash_key: &str) -> String {
    format!(
        "apiVersion: components.strato.dev/v1\n\
         kind: Table\n\
         metadata:\n  name: sessions\n  service: api\n\
         spec:\n  hash_key:\n    name: {hash_key}\n    key_type: S\n"
    )
}

/// Scenario 1 fixture: bucket `uploads` + table `sessions`, no edges.
fn write_basic_stack(root: &Path) {
    write_stack_root(root, "s1");
    write(root, "services/api/storage.yaml", &bucket_yaml(false));
    write(root, "services/api/table.yaml", &table_yaml("userId"));
}

// ── A provider that fails on request ─────────────────────────────────────────

struct FlakyProvider {
    inner: LocalProvider,
    fail_creates: HashSet<String>,
}

#[async_trait]
impl ResourceProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn create(
        &self,
        resource: &Component,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError> {
        if self.fail_creates.contains(&resource.metadata.name) {
            return Err(ProviderError::new(
                "flaky",
                "create",
                &resource.metadata.name,
                "injected create failure",
                ProviderErrorKind::Internal,
            ));
        }
        self.inner.create(resource, opts).await
    }

    async fn read(&self, id: &str, opts: &ResourceOptions) -> Result<ResourceResult, ProviderError> {
        self.inner.read(id, opts).await
    }

    async fn update(
        &self,
        id: &str,
        resource: &Component,
        opts: &ResourceOptions,
    ) -> Result<ResourceResult, ProviderError> {
        self.inner.update(id, resource, opts).await
    }

    async fn delete(&self, id: &str, opts: &ResourceOptions) -> Result<ResourceResult, ProviderError> {
        self.inner.delete(id, opts).await
    }

    async fn exists(&self, id: &str, opts: &ResourceOptions) -> Result<bool, ProviderError> {
        self.inner.exists(id, opts).await
    }

    async fn get_outputs(
        &self,
        id: &str,
        opts: &ResourceOptions,
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        self.inner.get_outputs(id, opts).await
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_apply_creates_everything() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    let report = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    assert_eq!(report.outcome, ApplyOutcome::Applied);
    assert_eq!(report.diff.create, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.plan.stage_count(), 1, "independent resources share one stage");
    assert_eq!(provider.resource_count().await, 2);

    let state = env.load_state("s1").await.expect("state persisted");
    assert_eq!(state.resources.len(), 2);
    let names: Vec<&str> = state.resources.keys().map(String::as_str).collect();
    assert_eq!(names, ["sessions", "uploads"]);
    for resource in state.resources.values() {
        assert_eq!(resource.status, strato_store::ResourceStatus::Ready);
        assert!(!resource.id.is_empty());
    }
    assert_eq!(state.apply_order.len(), 2);
    assert!(state.checksum.is_some());
}

#[tokio::test]
async fn reapply_is_a_noop_with_zero_provider_calls() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    let first_state = env.load_state("s1").await.unwrap();
    let ids: Vec<String> = first_state.resources.values().map(|r| r.id.clone()).collect();

    let report = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    assert_eq!(report.diff.no_change, 2);
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(provider.resource_count().await, 2);

    // No write was forced: the document is byte-identical, ids untouched.
    let second_state = env.load_state("s1").await.unwrap();
    assert_eq!(first_state, second_state);
    let second_ids: Vec<String> = second_state.resources.values().map(|r| r.id.clone()).collect();
    assert_eq!(ids, second_ids);
}

#[tokio::test]
async fn attribute_update_flows_through_provider() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());
    env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    let old_id = env.load_state("s1").await.unwrap().resources["uploads"].id.clone();

    write(dir.path(), "services/api/storage.yaml", &bucket_yaml(true));
    let report = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();

    assert_eq!(report.diff.update, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);

    let state = env.load_state("s1").await.unwrap();
    let uploads = &state.resources["uploads"];
    assert_eq!(uploads.id, old_id, "in-place update keeps the id");
    assert_eq!(
        uploads.attributes["spec"]["versioning"]["enabled"],
        serde_json::json!(true)
    );
    assert_eq!(provider.resource_count().await, 2);
}

#[tokio::test]
async fn hash_key_change_recreates_the_table() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());
    env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    let old_id = env.load_state("s1").await.unwrap().resources["sessions"].id.clone();

    write(dir.path(), "services/api/table.yaml", &table_yaml("accountId"));
    let report = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();

    assert_eq!(report.diff.recreate, 1);
    assert_eq!(report.created, 1, "recreate counts its create half");

    let state = env.load_state("s1").await.unwrap();
    let sessions = &state.resources["sessions"];
    assert_ne!(sessions.id, old_id, "recreate assigns a fresh id");
    assert_eq!(
        sessions.attributes["spec"]["hash_key"]["name"],
        serde_json::json!("accountId")
    );
    assert!(!provider.exists(&old_id, &ResourceOptions::default()).await.unwrap());
}

#[tokio::test]
async fn create_failure_rolls_back_completed_siblings() {
    // B depends on A; A creates, B fails, rollback deletes A.
    let local = LocalProvider::new();
    let flaky = FlakyProvider {
        inner: local.clone(),
        fail_creates: HashSet::from(["appconfig".to_string()]),
    };
    let env = setup(Arc::new(flaky)).await;

    let dir = tempfile::tempdir().unwrap();
    write_stack_root(dir.path(), "s1");
    write(dir.path(), "services/api/storage.yaml", &bucket_yaml(false));
    write(
        dir.path(),
        "services/api/config.yaml",
        "apiVersion: components.strato.dev/v1\n\
         kind: Bucket\n\
         metadata:\n  name: appconfig\n  service: api\n\
         spec:\n  acl: private\n\
         depends_on:\n  - uploads\n",
    );

    let err = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap_err();
    match &err {
        EngineError::ApplyFailed { resource, rollback, .. } => {
            assert_eq!(resource, "appconfig");
            let rollback = rollback.as_ref().expect("rollback ran");
            assert!(rollback.success);
            assert_eq!(rollback.success_count, 1, "uploads was reverted");
        }
        other => panic!("expected ApplyFailed, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);

    assert_eq!(local.resource_count().await, 0, "no resources survive rollback");
    assert!(env.load_state("s1").await.is_none(), "empty state is deleted");
}

#[tokio::test]
async fn no_rollback_keeps_partial_state() {
    let local = LocalProvider::new();
    let flaky = FlakyProvider {
        inner: local.clone(),
        fail_creates: HashSet::from(["appconfig".to_string()]),
    };
    let env = setup(Arc::new(flaky)).await;

    let dir = tempfile::tempdir().unwrap();
    write_stack_root(dir.path(), "s1");
    write(dir.path(), "services/api/storage.yaml", &bucket_yaml(false));
    write(
        dir.path(),
        "services/api/config.yaml",
        "apiVersion: components.strato.dev/v1\n\
         kind: Bucket\n\
         metadata:\n  name: appconfig\n  service: api\n\
         spec:\n  acl: private\n\
         depends_on:\n  - uploads\n",
    );

    let options = ApplyOptions { no_rollback: true, ..opts() };
    let err = env.engine.apply(dir.path(), &env.session, &options).await.unwrap_err();
    match &err {
        EngineError::ApplyFailed { rollback, .. } => assert!(rollback.is_none()),
        other => panic!("expected ApplyFailed, got {other:?}"),
    }

    assert_eq!(local.resource_count().await, 1, "uploads survives");
    let state = env.load_state("s1").await.expect("partial state persisted");
    assert!(state.resources.contains_key("uploads"));
    assert!(!state.resources.contains_key("appconfig"));
}

#[tokio::test]
async fn removed_component_is_deleted_from_cloud_and_state() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());
    env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();

    std::fs::remove_file(dir.path().join("services/api/table.yaml")).unwrap();
    let report = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();

    assert_eq!(report.diff.delete, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(provider.resource_count().await, 1);

    let state = env.load_state("s1").await.unwrap();
    assert!(state.resources.contains_key("uploads"));
    assert!(!state.resources.contains_key("sessions"));
}

#[tokio::test]
async fn dry_run_emits_plan_without_side_effects() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    let options = ApplyOptions { dry_run: true, ..opts() };
    let report = env.engine.apply(dir.path(), &env.session, &options).await.unwrap();

    assert_eq!(report.outcome, ApplyOutcome::DryRun);
    assert_eq!(report.plan.work_item_count(), 2);
    assert_eq!(provider.resource_count().await, 0);
    assert!(env.load_state("s1").await.is_none());
}

#[tokio::test]
async fn output_references_resolve_at_apply_time() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_stack_root(dir.path(), "s1");
    write(dir.path(), "services/api/table.yaml", &table_yaml("userId"));
    let app_yaml = [
        "apiVersion: components.strato.dev/v1",
        "kind: Service",
        "metadata:",
        "  name: web",
        "  service: api",
        "spec:",
        "  platform: fargate",
        "  image: app:latest",
        "  environment:",
        "    SESSIONS_TABLE: \"${component:sessions.table_name}\"",
    ]
    .join("\n");
    write(dir.path(), "services/api/app.yaml", &app_yaml);

    let report = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.plan.stage_count(), 2, "output reference orders the stages");

    let state = env.load_state("s1").await.unwrap();
    // State keeps the unresolved reference so re-apply stays clean...
    assert_eq!(
        state.resources["web"].attributes["spec"]["environment"]["SESSIONS_TABLE"],
        serde_json::json!("${component:sessions.table_name}")
    );
    // ...while the provider saw the substituted value.
    let web_id = &state.resources["web"].id;
    let live = provider.read(web_id, &ResourceOptions::default()).await.unwrap();
    assert_eq!(
        live.metadata["attributes"]["environment"]["SESSIONS_TABLE"],
        serde_json::json!("sessions")
    );

    // And the second apply is still a no-op.
    let second = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    assert_eq!(second.diff.no_change, 2);
}

#[tokio::test]
async fn lock_contention_fails_fast_with_holder_info() {
    let (env, _provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    let key = lock_key(&env.tenant.locks.prefix, "s1", "dev");
    env.locks
        .acquire(&key, std::time::Duration::from_secs(300), "other-operator")
        .await
        .unwrap();

    let err = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("other-operator"), "holder surfaces: {err}");
}

#[tokio::test]
async fn suspended_tenant_cannot_apply() {
    let (env, _provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    TenantRegistry::new(Arc::new(env.backend.clone()))
        .suspend(&env.tenant.id)
        .await
        .unwrap();

    let err = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap_err();
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn admin_session_cannot_apply() {
    let (env, _provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    let admin = Session { mode: SessionMode::Admin, ..env.session.clone() };
    let err = env.engine.apply(dir.path(), &admin, &opts()).await.unwrap_err();
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn cancellation_before_dispatch_aborts_cleanly() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());

    let (tx, rx) = tokio::sync::watch::channel(true);
    let options = ApplyOptions { cancel: Some(rx), ..opts() };
    let err = env.engine.apply(dir.path(), &env.session, &options).await.unwrap_err();
    drop(tx);

    assert!(matches!(err, EngineError::Cancelled { .. }));
    assert_eq!(provider.resource_count().await, 0);
}

#[tokio::test]
async fn destroy_reverses_recorded_order_and_deletes_state() {
    let (env, provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());
    env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();

    let report = env.engine.destroy("s1", &env.session, &opts()).await.unwrap();
    assert_eq!(report.destroyed, 2);
    assert!(report.failed.is_empty());
    assert!(report.state_deleted);
    assert_eq!(provider.resource_count().await, 0);
    assert!(env.load_state("s1").await.is_none());

    // Destroy then apply reproduces the same logical state with fresh ids.
    let reapplied = env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();
    assert_eq!(reapplied.created, 2);
    assert_eq!(provider.resource_count().await, 2);
}

#[tokio::test]
async fn tenant_state_keys_stay_inside_tenant_prefix() {
    let (env, _provider) = setup_local().await;
    let dir = tempfile::tempdir().unwrap();
    write_basic_stack(dir.path());
    env.engine.apply(dir.path(), &env.session, &opts()).await.unwrap();

    let keys = env.backend.list("").await.unwrap();
    for key in keys {
        assert!(
            key == "tenants.yaml" || key.starts_with(&format!("{}/", env.tenant.storage.prefix)),
            "key '{key}' escaped the tenant prefix"
        );
    }
}
