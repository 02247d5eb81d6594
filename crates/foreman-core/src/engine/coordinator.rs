//! Workflow lifecycle coordination: initiation, completion handling, and
//! the post-commit effects both produce.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::Database;
use crate::engine::executor::{
    PostCommitEffect, StageResult, TransitionOutcome, WorkflowExecutor,
};
use crate::error::CoreError;
use crate::models::{activity_types, Activity, Operation, SessionRecord, WorkOrderState};
use crate::routing::{select_agent, select_oversight, AvailabilitySnapshot, RoleProfile};
use crate::session::{Notifier, SessionSpawner, SpawnRequest};
use crate::store::{
    ActivityStore, AgentStore, OperationStore, SessionStore, WorkOrderStore,
};
use crate::workflow::{WorkflowContext, WorkflowRegistry};

pub struct Coordinator {
    db: Database,
    work_orders: WorkOrderStore,
    operations: OperationStore,
    agents: AgentStore,
    activities: ActivityStore,
    sessions: SessionStore,
    registry: Arc<WorkflowRegistry>,
    spawner: Arc<dyn SessionSpawner>,
    notifier: Arc<dyn Notifier>,
    executor: WorkflowExecutor,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        work_orders: WorkOrderStore,
        operations: OperationStore,
        agents: AgentStore,
        activities: ActivityStore,
        sessions: SessionStore,
        registry: Arc<WorkflowRegistry>,
        spawner: Arc<dyn SessionSpawner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor = WorkflowExecutor::new(
            db.clone(),
            work_orders.clone(),
            operations.clone(),
            agents.clone(),
            activities.clone(),
            sessions.clone(),
            registry.clone(),
        );
        Self {
            db,
            work_orders,
            operations,
            agents,
            activities,
            sessions,
            registry,
            spawner,
            notifier,
            executor,
        }
    }

    /// Start a work order's workflow at its first runnable stage.
    ///
    /// Returns the created operation, or `None` when every stage was
    /// inapplicable and the work order shipped immediately. Finished work
    /// orders, and orders already carrying an open operation, are
    /// refused with [`CoreError::InvalidState`]. The session
    /// spawn happens after the transition commits; a spawn failure blocks
    /// the operation but the initiation stands and is retry-safe.
    pub async fn initiate_workflow(
        &self,
        work_order_id: &str,
        workflow_id: Option<&str>,
        context: WorkflowContext,
    ) -> Result<Option<Operation>, CoreError> {
        let order = self
            .work_orders
            .get(work_order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("work order {}", work_order_id)))?;
        if order.state.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "work order {} is {} and cannot start a workflow",
                order.id,
                order.state.as_str()
            )));
        }
        // Checked up front so the caller sees a clear error instead of the
        // unique-index violation on the open-operation insert.
        if self.operations.open_for_work_order(&order.id).await?.is_some() {
            return Err(CoreError::InvalidState(format!(
                "work order {} already has an open operation",
                order.id
            )));
        }

        let workflow_id = workflow_id
            .map(String::from)
            .or_else(|| order.workflow_id.clone())
            .unwrap_or_else(|| WorkflowRegistry::default_id().to_string());
        let definition = self.registry.get(&workflow_id)?;

        let (first_index, skipped) = definition.next_runnable(0, &context);
        let skip_activities: Vec<Activity> = skipped
            .iter()
            .map(|key| {
                Activity::new(
                    activity_types::STAGE_SKIPPED,
                    "coordinator",
                    "work_order",
                    order.id.clone(),
                    format!("{} skipped stage '{}'", order.code, key),
                    serde_json::json!({ "stage": key }),
                )
            })
            .collect();

        let started = Activity::new(
            activity_types::WORKFLOW_STARTED,
            "coordinator",
            "work_order",
            order.id.clone(),
            format!("{} started workflow '{}'", order.code, workflow_id),
            serde_json::json!({
                "workflowId": workflow_id,
                "context": context.to_value(),
            }),
        );

        let Some(first_index) = first_index else {
            // Nothing applicable to run. Ship immediately.
            let mut shipped = order.clone();
            shipped.state = WorkOrderState::Shipped;
            shipped.shipped_at = Some(Utc::now());
            shipped.workflow_id = Some(workflow_id);

            self.db
                .with_tx_async(move |tx| {
                    WorkOrderStore::upsert_tx(tx, &shipped)?;
                    ActivityStore::append_tx(tx, &started)?;
                    for skip in &skip_activities {
                        ActivityStore::append_tx(tx, skip)?;
                    }
                    Ok(())
                })
                .await?;
            return Ok(None);
        };

        let first_stage = definition.stage(first_index)?;
        let agent = {
            let agents = self.agents.list_all().await?;
            let open_ops = self.operations.list_open().await?;
            let live_sessions = self.sessions.list_all().await?;
            let snapshot =
                AvailabilitySnapshot::compute(&agents, &open_ops, &live_sessions, Utc::now());
            select_agent(&agents, &RoleProfile::for_role(&first_stage.role), &snapshot)
                .cloned()
                .ok_or_else(|| {
                    CoreError::NoEligibleAgent(format!("no agent for stage '{}'", first_stage.key))
                })?
        };

        let operation = Operation::new(
            uuid::Uuid::new_v4().to_string(),
            order.id.clone(),
            first_stage.key.clone(),
            format!("{}: {}", first_stage.title, order.title),
            workflow_id.clone(),
            first_index,
            vec![agent.id.clone()],
        );

        let mut activated = order.clone();
        activated.state = WorkOrderState::Active;
        activated.workflow_id = Some(workflow_id);
        activated.current_stage_index = first_index;

        {
            let op = operation.clone();
            let wo = activated;
            self.db
                .with_tx_async(move |tx| {
                    OperationStore::upsert_tx(tx, &op)?;
                    WorkOrderStore::upsert_tx(tx, &wo)?;
                    ActivityStore::append_tx(tx, &started)?;
                    for skip in &skip_activities {
                        ActivityStore::append_tx(tx, skip)?;
                    }
                    Ok(())
                })
                .await?;
        }

        info!(work_order_id = %order.id, stage = %first_stage.key, "workflow initiated");

        self.run_effects(&[PostCommitEffect::SpawnSession {
            operation: operation.clone(),
            agent,
            label: format!("{} {}", order.code, first_stage.key),
            task: order.goal.clone(),
        }])
        .await;

        // The spawn may have blocked the operation; return its current row.
        Ok(self.operations.get(&operation.id).await?.or(Some(operation)))
    }

    /// Process an agent's completion report for its operation: record the
    /// receipt, advance the state machine, then run the matching side
    /// effect (spawn the next session, or notify oversight).
    pub async fn handle_agent_completion(
        &self,
        operation_id: &str,
        result: StageResult,
    ) -> Result<TransitionOutcome, CoreError> {
        let operation = self
            .operations
            .get(operation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("operation {}", operation_id)))?;

        self.activities
            .append(&Activity::new(
                activity_types::COMPLETION_RECEIVED,
                operation
                    .assignee_agent_ids
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "unknown".into()),
                "operation",
                operation.id.clone(),
                format!("Completion received for '{}'", operation.title),
                serde_json::json!({
                    "outcome": result.outcome,
                    "artifacts": result.artifacts,
                }),
            ))
            .await?;

        let outcome = self.executor.advance(operation_id, &result).await?;
        self.run_effects(&outcome.effects).await;
        Ok(outcome)
    }

    /// Run post-commit effects. Best-effort: a spawn failure blocks the
    /// new operation with the error as reason, a notification failure is
    /// logged only, and neither unwinds the committed transition.
    pub async fn run_effects(&self, effects: &[PostCommitEffect]) {
        for effect in effects {
            match effect {
                PostCommitEffect::SpawnSession {
                    operation,
                    agent,
                    label,
                    task,
                } => {
                    let request = SpawnRequest {
                        agent_ref: agent.id.clone(),
                        label: label.clone(),
                        task: task.clone(),
                        context: serde_json::json!({
                            "workOrderId": operation.work_order_id,
                            "operationId": operation.id,
                            "stage": operation.station,
                        }),
                        model_hint: agent.model_hint.clone(),
                    };
                    match self.spawner.spawn(request).await {
                        Ok(session) => {
                            if let Err(e) = self
                                .sessions
                                .record(&SessionRecord::new(
                                    session.session_key,
                                    agent.id.clone(),
                                    label.clone(),
                                ))
                                .await
                            {
                                warn!(operation_id = %operation.id, error = %e, "failed to record session");
                            }
                        }
                        Err(e) => {
                            warn!(operation_id = %operation.id, error = %e, "post-commit spawn failed");
                            if let Err(block_err) =
                                self.operations.set_blocked(&operation.id, &e.to_string()).await
                            {
                                warn!(operation_id = %operation.id, error = %block_err, "failed to block operation");
                                continue;
                            }
                            let _ = self
                                .activities
                                .append(&Activity::new(
                                    activity_types::OPERATION_BLOCKED,
                                    "coordinator",
                                    "operation",
                                    operation.id.clone(),
                                    format!("Spawn failed for '{}'", operation.title),
                                    serde_json::json!({ "error": e.to_string() }),
                                ))
                                .await;
                        }
                    }
                }
                PostCommitEffect::NotifyOversight { message } => {
                    let agents = match self.agents.list_all().await {
                        Ok(agents) => agents,
                        Err(e) => {
                            warn!(error = %e, "failed to load agents for oversight notify");
                            continue;
                        }
                    };
                    match select_oversight(&agents) {
                        Some(target) => {
                            let session_key = target.session_key.clone().unwrap_or_default();
                            if let Err(e) = self.notifier.send(&session_key, message).await {
                                warn!(agent_id = %target.id, error = %e, "oversight notify failed");
                            }
                        }
                        None => {
                            warn!("no oversight agent with a live session key, dropping notice");
                        }
                    }
                }
            }
        }
    }
}
