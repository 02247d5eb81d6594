use std::collections::HashMap;

use crate::error::CoreError;
use crate::routing::Specialty;
use crate::workflow::schema::{Stage, StageCondition, StageRole, WorkflowDefinition};

/// Read-only table mapping workflow id to its stage list.
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    /// The built-in workflow catalog.
    pub fn builtin() -> Self {
        let mut workflows = HashMap::new();
        for def in [feature_delivery(), bug_fix(), security_audit()] {
            workflows.insert(def.id.clone(), def);
        }
        Self { workflows }
    }

    pub fn get(&self, workflow_id: &str) -> Result<&WorkflowDefinition, CoreError> {
        self.workflows
            .get(workflow_id)
            .ok_or_else(|| CoreError::UnknownWorkflow(workflow_id.to_string()))
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.workflows.contains_key(workflow_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Workflow used for work orders that carry none. A routing template
    /// naming a known workflow id takes precedence over this.
    pub fn default_id() -> &'static str {
        "feature_delivery"
    }
}

fn feature_delivery() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "feature_delivery",
        "Feature Delivery",
        vec![
            Stage::new("plan", "Plan", StageRole::Specialty(Specialty::Plan)),
            Stage::new("build", "Build", StageRole::Specialty(Specialty::Build)),
            Stage::new("review", "Review", StageRole::Specialty(Specialty::Review))
                .loops_to("build")
                .max_iterations(2),
            Stage::new("security_gate", "Security Gate", StageRole::Guard)
                .optional_if(StageCondition::SecuritySensitive)
                .with_veto(),
            Stage::new("deploy", "Deploy", StageRole::Specialty(Specialty::Ops))
                .optional_if(StageCondition::DeploymentNeeded),
        ],
    )
}

fn bug_fix() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "bug_fix",
        "Bug Fix",
        vec![
            Stage::new("build", "Fix", StageRole::Specialty(Specialty::Build)),
            Stage::new("review", "Verify Fix", StageRole::Specialty(Specialty::Review))
                .loops_to("build")
                .max_iterations(2),
            Stage::new("deploy", "Deploy", StageRole::Specialty(Specialty::Ops))
                .optional_if(StageCondition::DeploymentNeeded),
        ],
    )
}

fn security_audit() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "security_audit",
        "Security Audit",
        vec![
            Stage::new("audit", "Audit", StageRole::Specialty(Specialty::Security)),
            Stage::new("verdict", "Verdict", StageRole::Guard).with_veto(),
            Stage::new(
                "remediate",
                "Remediate",
                StageRole::Specialty(Specialty::Build),
            ),
            Stage::new(
                "verify",
                "Verify Remediation",
                StageRole::Specialty(Specialty::Review),
            )
            .loops_to("remediate")
            .max_iterations(2),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let registry = WorkflowRegistry::builtin();
        assert_eq!(
            registry.ids(),
            vec!["bug_fix", "feature_delivery", "security_audit"]
        );
        assert!(registry.get("feature_delivery").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(CoreError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn test_loop_targets_resolve() {
        let registry = WorkflowRegistry::builtin();
        for id in registry.ids() {
            let def = registry.get(id).unwrap();
            for stage in &def.stages {
                if let Some(target) = &stage.loop_target {
                    let target_idx = def.stage_index(target).expect("loop target must exist");
                    let own_idx = def.stage_index(&stage.key).unwrap();
                    assert!(target_idx < own_idx, "loop target must point backwards");
                }
            }
        }
    }
}
