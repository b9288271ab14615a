mod apply;
mod drift;
mod error;
mod journal;
mod plan;
mod report;

pub use apply::{ApplyOptions, Approver, AutoApprove, Engine};
pub use drift::{DriftDiff, DriftOptions, DriftReport, DriftResult, DriftStatus, DriftSummary};
pub use error::EngineError;
pub use journal::{Action, ActionType, RollbackFailure, RollbackJournal, RollbackResult};
pub use plan::{DeploymentPlan, PlanItem, PlanStage};
pub use report::{ApplyOutcome, ApplyReport, DestroyReport};
