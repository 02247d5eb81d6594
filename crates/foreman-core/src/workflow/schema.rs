use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::routing::Specialty;

/// Named boolean flags captured when a workflow starts, e.g.
/// {"deployment_needed": true}. Optional stages evaluate their condition
/// against this context; a missing flag reads as false.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext(HashMap<String, bool>);

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Closed set of stage applicability conditions. Each maps to one context
/// flag; there is no free-form string evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCondition {
    DeploymentNeeded,
    SecuritySensitive,
    DesignReview,
}

impl StageCondition {
    pub fn flag_name(&self) -> &'static str {
        match self {
            Self::DeploymentNeeded => "deployment_needed",
            Self::SecuritySensitive => "security_sensitive",
            Self::DesignReview => "design_review",
        }
    }

    pub fn evaluate(&self, ctx: &WorkflowContext) -> bool {
        ctx.flag(self.flag_name())
    }
}

/// Target role of a stage: a worker specialty, or an oversight role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Specialty(Specialty),
    Manager,
    Ceo,
    Guard,
}

impl StageRole {
    /// Oversight roles may be filled by non-dispatch-eligible agents.
    pub fn is_oversight(&self) -> bool {
        matches!(self, Self::Manager | Self::Ceo | Self::Guard)
    }
}

/// One step of a workflow definition.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage key, unique within the workflow. Loop targets refer to it.
    pub key: String,
    pub title: String,
    pub role: StageRole,
    /// Optional stages only run when their condition holds.
    pub optional: bool,
    pub condition: Option<StageCondition>,
    /// A vetoing stage can block the whole work order pending approval.
    pub can_veto: bool,
    /// Stage key to loop back to on rejection.
    pub loop_target: Option<String>,
    /// Rejections beyond this count escalate instead of looping.
    pub max_iterations: u32,
}

impl Stage {
    pub fn new(key: &str, title: &str, role: StageRole) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            role,
            optional: false,
            condition: None,
            can_veto: false,
            loop_target: None,
            max_iterations: 2,
        }
    }

    pub fn optional_if(mut self, condition: StageCondition) -> Self {
        self.optional = true;
        self.condition = Some(condition);
        self
    }

    pub fn with_veto(mut self) -> Self {
        self.can_veto = true;
        self
    }

    pub fn loops_to(mut self, target: &str) -> Self {
        self.loop_target = Some(target.to_string());
        self
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// A runnable stage either has no condition or its condition holds.
    pub fn is_runnable(&self, ctx: &WorkflowContext) -> bool {
        if !self.optional {
            return true;
        }
        self.condition.map(|c| c.evaluate(ctx)).unwrap_or(true)
    }
}

/// An ordered, named list of stages.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub stages: Vec<Stage>,
}

impl WorkflowDefinition {
    pub fn new(id: &str, name: &str, stages: Vec<Stage>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            stages,
        }
    }

    pub fn stage(&self, index: usize) -> Result<&Stage, CoreError> {
        self.stages.get(index).ok_or(CoreError::StageOutOfRange {
            workflow: self.id.clone(),
            index,
        })
    }

    pub fn stage_index(&self, key: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.key == key)
    }

    /// First runnable stage index at or after `from`, together with the
    /// keys of the optional stages skipped on the way.
    pub fn next_runnable(
        &self,
        from: usize,
        ctx: &WorkflowContext,
    ) -> (Option<usize>, Vec<String>) {
        let mut skipped = Vec::new();
        let mut idx = from;
        while idx < self.stages.len() {
            if self.stages[idx].is_runnable(ctx) {
                return (Some(idx), skipped);
            }
            skipped.push(self.stages[idx].key.clone());
            idx += 1;
        }
        (None, skipped)
    }
}
