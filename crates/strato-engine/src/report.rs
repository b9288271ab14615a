use std::time::Duration;

use serde::Serialize;
use strato_diff::DiffSummary;

use crate::plan::DeploymentPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Stages executed and state persisted.
    Applied,
    /// Plan emitted, nothing executed.
    DryRun,
    /// The approval gate said no; nothing executed.
    Declined,
}

/// What an apply did, for the caller to render.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub stack: String,
    pub environment: String,
    pub tenant: String,
    pub outcome: ApplyOutcome,
    pub plan: DeploymentPlan,
    pub diff: DiffSummary,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Items settled without a provider call (no-change and idempotent skips).
    pub skipped: usize,
    pub state_key: String,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
    pub stack: String,
    pub environment: String,
    pub tenant: String,
    pub destroyed: usize,
    /// Resources whose deletion failed, with the provider message. Destroy is
    /// forward-only: failures are reported, never rolled back.
    pub failed: Vec<(String, String)>,
    pub state_deleted: bool,
    #[serde(skip)]
    pub duration: Duration,
}
