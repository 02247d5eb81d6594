//! Per-operation workflow state machine.
//!
//! Every transition (advance, loop, escalate, complete) commits as one
//! transaction and returns the side effects to run afterwards. The two
//! phases are deliberately separate: a committed domain transition is never
//! unwound by a failing side effect.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::{
    activity_types, Activity, Agent, Approval, ApprovalType, Operation, OperationStatus,
    WorkOrder, WorkOrderState,
};
use crate::routing::{select_agent, AvailabilitySnapshot, RoleProfile};
use crate::store::{
    ActivityStore, AgentStore, ApprovalStore, OperationStore, SessionStore, WorkOrderStore,
};
use crate::workflow::{Stage, WorkflowContext, WorkflowRegistry};

/// What an agent reported back for its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Approved,
    Rejected,
    Vetoed,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub outcome: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl StageResult {
    pub fn approved() -> Self {
        Self {
            outcome: StageOutcome::Approved,
            output: None,
            feedback: None,
            artifacts: Vec::new(),
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            outcome: StageOutcome::Rejected,
            output: None,
            feedback: Some(feedback.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn vetoed(feedback: impl Into<String>) -> Self {
        Self {
            outcome: StageOutcome::Vetoed,
            output: None,
            feedback: Some(feedback.into()),
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    Loop,
    Escalate,
    Complete,
}

/// Side effect to run after the transition has committed. Best-effort: a
/// failure blocks the affected operation but the transition stands.
#[derive(Debug, Clone)]
pub enum PostCommitEffect {
    SpawnSession {
        operation: Operation,
        agent: Agent,
        label: String,
        task: String,
    },
    NotifyOversight {
        message: String,
    },
}

/// Result of one committed transition.
#[derive(Debug)]
pub struct TransitionOutcome {
    pub next_action: NextAction,
    pub work_order: WorkOrder,
    pub new_operation: Option<Operation>,
    pub approval: Option<Approval>,
    pub effects: Vec<PostCommitEffect>,
}

pub struct WorkflowExecutor {
    db: Database,
    work_orders: WorkOrderStore,
    operations: OperationStore,
    agents: AgentStore,
    activities: ActivityStore,
    sessions: SessionStore,
    registry: Arc<WorkflowRegistry>,
}

impl WorkflowExecutor {
    pub fn new(
        db: Database,
        work_orders: WorkOrderStore,
        operations: OperationStore,
        agents: AgentStore,
        activities: ActivityStore,
        sessions: SessionStore,
        registry: Arc<WorkflowRegistry>,
    ) -> Self {
        Self {
            db,
            work_orders,
            operations,
            agents,
            activities,
            sessions,
            registry,
        }
    }

    /// Advance the state machine for one operation given its stage result.
    ///
    /// Only open operations move the machine. A closed one (done, or
    /// blocked behind a pending approval) is refused so a replayed
    /// completion cannot advance past an escalation.
    pub async fn advance(
        &self,
        operation_id: &str,
        result: &StageResult,
    ) -> Result<TransitionOutcome, CoreError> {
        let operation = self
            .operations
            .get(operation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("operation {}", operation_id)))?;
        if !operation.status.is_open() {
            return Err(CoreError::InvalidState(format!(
                "operation {} is {} and closed to automation",
                operation.id,
                operation.status.as_str()
            )));
        }
        let order = self
            .work_orders
            .get(&operation.work_order_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("work order {}", operation.work_order_id))
            })?;

        let definition = self.registry.get(&operation.workflow_id)?;
        let stage = definition.stage(operation.workflow_stage_index)?.clone();
        let context = self
            .activities
            .workflow_context(&order.id)
            .await?
            .map(|v| WorkflowContext::from_value(&v))
            .unwrap_or_default();

        match result.outcome {
            StageOutcome::Vetoed if stage.can_veto => {
                self.escalate(
                    &operation,
                    &order,
                    &stage,
                    ApprovalType::RiskyAction,
                    "security_veto",
                    result,
                )
                .await
            }
            StageOutcome::Rejected if stage.loop_target.is_some() => {
                if operation.iteration_count >= stage.max_iterations {
                    self.escalate(
                        &operation,
                        &order,
                        &stage,
                        ApprovalType::ScopeChange,
                        "iteration_cap_exceeded",
                        result,
                    )
                    .await
                } else {
                    self.loop_back(&operation, &order, &stage, definition.clone(), result)
                        .await
                }
            }
            _ => {
                self.advance_forward(&operation, &order, definition.clone(), &context, result)
                    .await
            }
        }
    }

    /// Block the operation and work order, create a pending approval, and
    /// hand control to a human. Terminal for automation.
    async fn escalate(
        &self,
        operation: &Operation,
        order: &WorkOrder,
        stage: &Stage,
        approval_type: ApprovalType,
        reason: &str,
        result: &StageResult,
    ) -> Result<TransitionOutcome, CoreError> {
        let question = escalation_brief(order, stage, reason, result.feedback.as_deref());
        let approval = Approval::pending(
            uuid::Uuid::new_v4().to_string(),
            order.id.clone(),
            operation.id.clone(),
            approval_type,
            question.clone(),
        );

        let mut blocked_op = operation.clone();
        blocked_op.status = OperationStatus::Blocked;
        blocked_op.blocked_reason = Some(reason.to_string());
        blocked_op.escalation_reason = Some(reason.to_string());

        let mut blocked_order = order.clone();
        blocked_order.state = WorkOrderState::Blocked;
        blocked_order.blocked_reason = Some(reason.to_string());

        let activity = Activity::new(
            activity_types::WORKFLOW_ESCALATED,
            "executor",
            "work_order",
            order.id.clone(),
            format!("Escalated {} at stage '{}': {}", order.code, stage.key, reason),
            serde_json::json!({
                "operationId": operation.id,
                "approvalId": approval.id,
                "reason": reason,
            }),
        );

        {
            let op = blocked_op;
            let wo = blocked_order.clone();
            let appr = approval.clone();
            let act = activity;
            self.db
                .with_tx_async(move |tx| {
                    OperationStore::upsert_tx(tx, &op)?;
                    WorkOrderStore::upsert_tx(tx, &wo)?;
                    ApprovalStore::insert_tx(tx, &appr)?;
                    ActivityStore::append_tx(tx, &act)?;
                    Ok(())
                })
                .await?;
        }

        info!(work_order_id = %order.id, reason, "workflow escalated");
        Ok(TransitionOutcome {
            next_action: NextAction::Escalate,
            work_order: blocked_order,
            new_operation: None,
            approval: Some(approval),
            effects: vec![PostCommitEffect::NotifyOversight { message: question }],
        })
    }

    /// Create a fresh operation at the loop-target stage with an
    /// incremented iteration count. The originating operation closes; its
    /// stage index is never mutated.
    async fn loop_back(
        &self,
        operation: &Operation,
        order: &WorkOrder,
        stage: &Stage,
        definition: crate::workflow::WorkflowDefinition,
        result: &StageResult,
    ) -> Result<TransitionOutcome, CoreError> {
        let target_key = stage
            .loop_target
            .as_deref()
            .ok_or_else(|| CoreError::Internal("loop without target".into()))?;
        let target_index = definition.stage_index(target_key).ok_or_else(|| {
            CoreError::Internal(format!(
                "loop target '{}' missing from workflow '{}'",
                target_key, definition.id
            ))
        })?;
        let target_stage = definition.stage(target_index)?;

        let agent = self.resolve_stage_agent(target_stage).await?;
        let mut new_op = Operation::new(
            uuid::Uuid::new_v4().to_string(),
            order.id.clone(),
            target_stage.key.clone(),
            format!("{}: {}", target_stage.title, order.title),
            operation.workflow_id.clone(),
            target_index,
            vec![agent.id.clone()],
        );
        new_op.status = OperationStatus::Rework;
        new_op.iteration_count = operation.iteration_count + 1;
        new_op.loops_from_operation_id = Some(operation.id.clone());

        let mut closed_op = operation.clone();
        closed_op.status = OperationStatus::Done;

        let mut updated_order = order.clone();
        updated_order.state = WorkOrderState::Active;
        updated_order.current_stage_index = target_index;

        let activity = Activity::new(
            activity_types::STAGE_LOOPED,
            "executor",
            "work_order",
            order.id.clone(),
            format!(
                "{} looped back from '{}' to '{}' (iteration {})",
                order.code, stage.key, target_key, new_op.iteration_count
            ),
            serde_json::json!({
                "fromOperationId": operation.id,
                "toOperationId": new_op.id,
                "feedback": result.feedback,
            }),
        );

        {
            let old = closed_op;
            let new = new_op.clone();
            let wo = updated_order.clone();
            let act = activity;
            self.db
                .with_tx_async(move |tx| {
                    OperationStore::upsert_tx(tx, &old)?;
                    OperationStore::upsert_tx(tx, &new)?;
                    WorkOrderStore::upsert_tx(tx, &wo)?;
                    ActivityStore::append_tx(tx, &act)?;
                    Ok(())
                })
                .await?;
        }

        let task = rework_task(order, result.feedback.as_deref());
        info!(work_order_id = %order.id, target = target_key, "stage looped");
        Ok(TransitionOutcome {
            next_action: NextAction::Loop,
            work_order: updated_order,
            new_operation: Some(new_op.clone()),
            approval: None,
            effects: vec![PostCommitEffect::SpawnSession {
                operation: new_op,
                agent,
                label: format!("{} {} rework", order.code, target_key),
                task,
            }],
        })
    }

    /// Advance past the current stage, skipping inapplicable optional
    /// stages, completing the work order when none remain.
    async fn advance_forward(
        &self,
        operation: &Operation,
        order: &WorkOrder,
        definition: crate::workflow::WorkflowDefinition,
        context: &WorkflowContext,
        result: &StageResult,
    ) -> Result<TransitionOutcome, CoreError> {
        let (next_index, skipped) =
            definition.next_runnable(operation.workflow_stage_index + 1, context);

        let mut closed_op = operation.clone();
        closed_op.status = OperationStatus::Done;

        let skip_activities: Vec<Activity> = skipped
            .iter()
            .map(|key| {
                Activity::new(
                    activity_types::STAGE_SKIPPED,
                    "executor",
                    "work_order",
                    order.id.clone(),
                    format!("{} skipped stage '{}'", order.code, key),
                    serde_json::json!({ "stage": key }),
                )
            })
            .collect();

        match next_index {
            None => {
                let mut shipped = order.clone();
                shipped.state = WorkOrderState::Shipped;
                shipped.shipped_at = Some(Utc::now());

                let activity = Activity::new(
                    activity_types::WORKFLOW_COMPLETED,
                    "executor",
                    "work_order",
                    order.id.clone(),
                    format!("{} completed its workflow", order.code),
                    serde_json::json!({ "operationId": operation.id }),
                );

                {
                    let old = closed_op;
                    let wo = shipped.clone();
                    let act = activity;
                    let skips = skip_activities;
                    self.db
                        .with_tx_async(move |tx| {
                            OperationStore::upsert_tx(tx, &old)?;
                            WorkOrderStore::upsert_tx(tx, &wo)?;
                            for skip in &skips {
                                ActivityStore::append_tx(tx, skip)?;
                            }
                            ActivityStore::append_tx(tx, &act)?;
                            Ok(())
                        })
                        .await?;
                }

                info!(work_order_id = %order.id, "workflow completed");
                Ok(TransitionOutcome {
                    next_action: NextAction::Complete,
                    work_order: shipped.clone(),
                    new_operation: None,
                    approval: None,
                    effects: vec![PostCommitEffect::NotifyOversight {
                        message: format!("{} shipped: {}", shipped.code, shipped.title),
                    }],
                })
            }
            Some(next_index) => {
                let next_stage = definition.stage(next_index)?;
                let agent = self.resolve_stage_agent(next_stage).await?;

                let mut new_op = Operation::new(
                    uuid::Uuid::new_v4().to_string(),
                    order.id.clone(),
                    next_stage.key.clone(),
                    format!("{}: {}", next_stage.title, order.title),
                    operation.workflow_id.clone(),
                    next_index,
                    vec![agent.id.clone()],
                );
                // Carry the iteration count forward so a downstream stage
                // rejecting again counts against the same loop budget.
                new_op.iteration_count = operation.iteration_count;

                let mut updated_order = order.clone();
                updated_order.state = WorkOrderState::Active;
                updated_order.current_stage_index = next_index;

                let activity = Activity::new(
                    activity_types::STAGE_ADVANCED,
                    "executor",
                    "work_order",
                    order.id.clone(),
                    format!("{} advanced to stage '{}'", order.code, next_stage.key),
                    serde_json::json!({
                        "fromOperationId": operation.id,
                        "toOperationId": new_op.id,
                        "stageIndex": next_index,
                    }),
                );

                {
                    let old = closed_op;
                    let new = new_op.clone();
                    let wo = updated_order.clone();
                    let act = activity;
                    let skips = skip_activities;
                    self.db
                        .with_tx_async(move |tx| {
                            OperationStore::upsert_tx(tx, &old)?;
                            OperationStore::upsert_tx(tx, &new)?;
                            WorkOrderStore::upsert_tx(tx, &wo)?;
                            for skip in &skips {
                                ActivityStore::append_tx(tx, skip)?;
                            }
                            ActivityStore::append_tx(tx, &act)?;
                            Ok(())
                        })
                        .await?;
                }

                let task = stage_task(order, result.output.as_deref());
                info!(work_order_id = %order.id, stage = %next_stage.key, "stage advanced");
                Ok(TransitionOutcome {
                    next_action: NextAction::Continue,
                    work_order: updated_order,
                    new_operation: Some(new_op.clone()),
                    approval: None,
                    effects: vec![PostCommitEffect::SpawnSession {
                        operation: new_op,
                        agent,
                        label: format!("{} {}", order.code, next_stage.key),
                        task,
                    }],
                })
            }
        }
    }

    /// Score every agent for the stage's role. Oversight roles may land on
    /// non-dispatch-eligible agents; worker specialties will not.
    async fn resolve_stage_agent(&self, stage: &Stage) -> Result<Agent, CoreError> {
        let agents = self.agents.list_all().await?;
        let open_ops = self.operations.list_open().await?;
        let live_sessions = self.sessions.list_all().await?;
        let snapshot =
            AvailabilitySnapshot::compute(&agents, &open_ops, &live_sessions, Utc::now());

        select_agent(&agents, &RoleProfile::for_role(&stage.role), &snapshot)
            .cloned()
            .ok_or_else(|| {
                CoreError::NoEligibleAgent(format!("no agent for stage '{}'", stage.key))
            })
    }
}

fn escalation_brief(
    order: &WorkOrder,
    stage: &Stage,
    reason: &str,
    feedback: Option<&str>,
) -> String {
    let mut brief = format!(
        "{} ({}) is blocked at stage '{}' ({}). ",
        order.code, order.title, stage.key, reason
    );
    if let Some(feedback) = feedback {
        brief.push_str(&format!("Latest feedback: {}. ", feedback));
    }
    brief.push_str("Approve to resume, reject to cancel.");
    brief
}

fn rework_task(order: &WorkOrder, feedback: Option<&str>) -> String {
    match feedback {
        Some(feedback) => format!("{}\n\nRework requested: {}", order.goal, feedback),
        None => format!("{}\n\nRework requested.", order.goal),
    }
}

fn stage_task(order: &WorkOrder, previous_output: Option<&str>) -> String {
    match previous_output {
        Some(output) => format!("{}\n\nPrevious stage output: {}", order.goal, output),
        None => order.goal.clone(),
    }
}
