use serde::Serialize;
use strato_diff::{ChangeSet, ChangeType};
use strato_domain::Kind;
use strato_graph::Stage;

/// One resource scheduled within a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanItem {
    pub name: String,
    pub kind: Kind,
    pub service: String,
    pub action: ChangeType,
}

/// All items of a stage are mutually independent and may run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStage {
    pub number: usize,
    pub items: Vec<PlanItem>,
}

/// The staged execution schedule: topological levels annotated with the
/// per-resource action from the change set.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct DeploymentPlan {
    pub stages: Vec<PlanStage>,
}

impl DeploymentPlan {
    pub fn build(stages: &[Stage], change_set: &ChangeSet) -> Self {
        let plan_stages = stages
            .iter()
            .map(|stage| PlanStage {
                number: stage.number,
                items: stage
                    .components
                    .iter()
                    .filter_map(|name| {
                        change_set.change_for(name).map(|change| PlanItem {
                            name: name.clone(),
                            kind: change.kind,
                            service: change.service.clone(),
                            action: change.change_type,
                        })
                    })
                    .collect(),
            })
            .collect();
        Self { stages: plan_stages }
    }

    /// Items that will reach a provider (everything but `NoChange`).
    pub fn work_item_count(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.items.iter())
            .filter(|i| i.action != ChangeType::NoChange)
            .count()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
