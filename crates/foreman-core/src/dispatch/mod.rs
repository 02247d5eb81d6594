//! Automated dispatch loop.
//!
//! Converts queued (planned) work orders into active assignments: classify,
//! score, assign inside one transaction, then spawn the execution session
//! outside it. At most one loop instance runs per process; an overlapping
//! call returns [`DispatchOutcome::Overlap`] immediately instead of
//! blocking. This guard is process-local only, so multi-process deployments
//! need an external mutex.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::models::{
    activity_types, Activity, Operation, OwnerRef, SessionRecord, WorkOrder, WorkOrderState,
};
use crate::routing::{classify, select_agent, AvailabilitySnapshot, RoleProfile, Specialty};
use crate::session::{SessionSpawner, SpawnRequest};
use crate::store::{
    ActivityStore, AgentStore, OperationStore, SessionStore, WorkOrderStore,
};
use crate::workflow::WorkflowRegistry;

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Maximum planned work orders pulled per invocation.
    pub limit: u32,
    /// Perform selection and load bookkeeping without persisting or
    /// spawning anything.
    pub dry_run: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub work_order_id: String,
    pub work_order_code: String,
    pub agent_id: String,
    pub agent_name: String,
    pub specialty: Specialty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRecord {
    pub work_order_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub work_order_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub eligible_agents: u32,
    pub busy_agents: u32,
    pub queued: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub scanned: u32,
    pub dispatched: u32,
    pub failed: u32,
    pub skipped: u32,
    pub assignments: Vec<AssignmentRecord>,
    pub failures: Vec<FailureRecord>,
    pub skips: Vec<SkipRecord>,
    pub summary: DispatchSummary,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Another dispatch pass is already running in this process.
    Overlap,
    Completed(DispatchReport),
}

pub struct Dispatcher {
    db: crate::db::Database,
    work_orders: WorkOrderStore,
    operations: OperationStore,
    agents: AgentStore,
    sessions: SessionStore,
    registry: Arc<WorkflowRegistry>,
    spawner: Arc<dyn SessionSpawner>,
    guard: Mutex<()>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: crate::db::Database,
        work_orders: WorkOrderStore,
        operations: OperationStore,
        agents: AgentStore,
        sessions: SessionStore,
        registry: Arc<WorkflowRegistry>,
        spawner: Arc<dyn SessionSpawner>,
    ) -> Self {
        Self {
            db,
            work_orders,
            operations,
            agents,
            sessions,
            registry,
            spawner,
            guard: Mutex::new(()),
        }
    }

    /// Run one dispatch pass. Returns [`DispatchOutcome::Overlap`] without
    /// doing any work if a pass is already in flight.
    pub async fn run(&self, options: DispatchOptions) -> Result<DispatchOutcome, CoreError> {
        let _guard = match self.guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("dispatch pass already running, overlap prevented");
                return Ok(DispatchOutcome::Overlap);
            }
        };

        let queue = self.work_orders.list_planned(options.limit).await?;
        let all_agents = self.agents.list_all().await?;
        let open_ops = self.operations.list_open().await?;
        let live_sessions = self.sessions.list_all().await?;
        let mut snapshot =
            AvailabilitySnapshot::compute(&all_agents, &open_ops, &live_sessions, Utc::now());

        let eligible: u32 = all_agents
            .iter()
            .filter(|a| snapshot.is_available(a))
            .count() as u32;
        let busy = all_agents
            .iter()
            .filter(|a| a.dispatch_eligible && !snapshot.is_available(a))
            .count() as u32;

        let mut report = DispatchReport {
            scanned: queue.len() as u32,
            dispatched: 0,
            failed: 0,
            skipped: 0,
            assignments: Vec::new(),
            failures: Vec::new(),
            skips: Vec::new(),
            summary: DispatchSummary {
                eligible_agents: eligible,
                busy_agents: busy,
                queued: queue.len() as u32,
                timestamp: Utc::now(),
            },
        };

        for order in queue {
            match self
                .dispatch_one(&order, &all_agents, &mut snapshot, options)
                .await
            {
                Ok(ItemOutcome::Assigned(record)) => {
                    report.dispatched += 1;
                    report.assignments.push(record);
                }
                Ok(ItemOutcome::Skipped(record)) => {
                    report.skipped += 1;
                    report.skips.push(record);
                }
                Ok(ItemOutcome::Failed(record)) => {
                    report.failed += 1;
                    report.failures.push(record);
                }
                // One bad work order never blocks the rest of the batch.
                Err(e) => {
                    warn!(work_order_id = %order.id, error = %e, "dispatch item failed");
                    report.failed += 1;
                    report.failures.push(FailureRecord {
                        work_order_id: order.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            dispatched = report.dispatched,
            skipped = report.skipped,
            failed = report.failed,
            "dispatch pass finished"
        );
        Ok(DispatchOutcome::Completed(report))
    }

    async fn dispatch_one(
        &self,
        order: &WorkOrder,
        all_agents: &[crate::models::Agent],
        snapshot: &mut AvailabilitySnapshot,
        options: DispatchOptions,
    ) -> Result<ItemOutcome, CoreError> {
        // Idempotency guard, backed by the partial unique index on open
        // operations in case two passes race.
        if self.operations.open_for_work_order(&order.id).await?.is_some() {
            return Ok(ItemOutcome::Skipped(SkipRecord {
                work_order_id: order.id.clone(),
                reason: "already has an open operation".into(),
            }));
        }

        let specialty = classify(order);
        let candidates: Vec<crate::models::Agent> = all_agents
            .iter()
            .filter(|a| snapshot.is_available(a))
            .cloned()
            .collect();

        let agent = select_agent(&candidates, &RoleProfile::for_specialty(specialty), snapshot)
            .or_else(|| {
                select_agent(
                    &candidates,
                    &RoleProfile::for_specialty(Specialty::Build),
                    snapshot,
                )
            })
            .or_else(|| candidates.first())
            .cloned();

        let Some(agent) = agent else {
            return Ok(ItemOutcome::Skipped(SkipRecord {
                work_order_id: order.id.clone(),
                reason: format!("no eligible agent for specialty '{}'", specialty.as_str()),
            }));
        };

        if options.dry_run {
            snapshot.note_assignment(&agent.id);
            return Ok(ItemOutcome::Assigned(AssignmentRecord {
                work_order_id: order.id.clone(),
                work_order_code: order.code.clone(),
                agent_id: agent.id.clone(),
                agent_name: agent.display_name.clone(),
                specialty,
                operation_id: None,
                dry_run: true,
            }));
        }

        let workflow_id = self.resolve_workflow_id(order);
        let definition = self.registry.get(&workflow_id)?;
        let stage = definition.stage(order.current_stage_index)?;

        let operation = Operation::new(
            uuid::Uuid::new_v4().to_string(),
            order.id.clone(),
            specialty.as_str().to_string(),
            format!("{}: {}", stage.title, order.title),
            workflow_id.clone(),
            order.current_stage_index,
            vec![agent.id.clone()],
        );

        let mut activated = order.clone();
        activated.state = WorkOrderState::Active;
        activated.owner = Some(OwnerRef::agent(agent.id.clone()));
        activated.workflow_id = Some(workflow_id.clone());

        let activity = Activity::new(
            activity_types::WORK_ORDER_DISPATCHED,
            "dispatcher",
            "work_order",
            order.id.clone(),
            format!("Dispatched {} to {}", order.code, agent.display_name),
            serde_json::json!({
                "agentId": agent.id,
                "operationId": operation.id,
                "specialty": specialty.as_str(),
            }),
        );

        {
            let op = operation.clone();
            let wo = activated.clone();
            let act = activity.clone();
            self.db
                .with_tx_async(move |tx| {
                    OperationStore::upsert_tx(tx, &op)?;
                    WorkOrderStore::upsert_tx(tx, &wo)?;
                    ActivityStore::append_tx(tx, &act)?;
                    Ok(())
                })
                .await?;
        }

        // Spawn outside the transaction. Failure compensates by deleting
        // the operation and returning the work order to the queue.
        let spawn = self
            .spawner
            .spawn(SpawnRequest {
                agent_ref: agent.id.clone(),
                label: format!("{} {}", order.code, stage.key),
                task: order.goal.clone(),
                context: serde_json::json!({
                    "workOrderId": order.id,
                    "operationId": operation.id,
                    "stage": stage.key,
                }),
                model_hint: agent.model_hint.clone(),
            })
            .await;

        match spawn {
            Ok(session) => {
                self.sessions
                    .record(&SessionRecord::new(
                        session.session_key,
                        agent.id.clone(),
                        format!("{} {}", order.code, stage.key),
                    ))
                    .await?;
                snapshot.note_assignment(&agent.id);
                Ok(ItemOutcome::Assigned(AssignmentRecord {
                    work_order_id: order.id.clone(),
                    work_order_code: order.code.clone(),
                    agent_id: agent.id.clone(),
                    agent_name: agent.display_name.clone(),
                    specialty,
                    operation_id: Some(operation.id),
                    dry_run: false,
                }))
            }
            Err(e) => {
                warn!(work_order_id = %order.id, error = %e, "spawn failed, compensating");
                let mut reverted = order.clone();
                reverted.state = WorkOrderState::Planned;
                let failure = Activity::new(
                    activity_types::DISPATCH_FAILED,
                    "dispatcher",
                    "work_order",
                    order.id.clone(),
                    format!("Spawn failed for {}", order.code),
                    serde_json::json!({ "error": e.to_string(), "agentId": agent.id }),
                );

                // The undo is one transaction too: a partially applied
                // compensation would strand the order as active with no
                // open operation, invisible to the next pass.
                {
                    let op_id = operation.id.clone();
                    let wo = reverted;
                    let act = failure;
                    self.db
                        .with_tx_async(move |tx| {
                            OperationStore::delete_tx(tx, &op_id)?;
                            WorkOrderStore::upsert_tx(tx, &wo)?;
                            ActivityStore::append_tx(tx, &act)?;
                            Ok(())
                        })
                        .await?;
                }
                Ok(ItemOutcome::Failed(FailureRecord {
                    work_order_id: order.id.clone(),
                    error: e.to_string(),
                }))
            }
        }
    }

    /// Workflow id resolution: explicit workflow, then a routing template
    /// naming a known workflow, then the registry default.
    fn resolve_workflow_id(&self, order: &WorkOrder) -> String {
        if let Some(id) = &order.workflow_id {
            if self.registry.contains(id) {
                return id.clone();
            }
        }
        if let Some(template) = &order.routing_template {
            if self.registry.contains(template) {
                return template.clone();
            }
        }
        WorkflowRegistry::default_id().to_string()
    }
}

enum ItemOutcome {
    Assigned(AssignmentRecord),
    Skipped(SkipRecord),
    Failed(FailureRecord),
}
