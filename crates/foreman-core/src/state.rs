//! Shared engine state wiring the database, stores, workflow registry and
//! services together. Cloning is cheap; everything inside is shared.

use std::sync::Arc;

use crate::db::Database;
use crate::dispatch::Dispatcher;
use crate::engine::Coordinator;
use crate::session::{Notifier, SessionSpawner};
use crate::store::{
    ActivityStore, AgentStore, ApprovalStore, OperationStore, SessionStore, WorkOrderStore,
};
use crate::workflow::WorkflowRegistry;

pub struct EngineStateInner {
    pub db: Database,
    pub work_orders: WorkOrderStore,
    pub operations: OperationStore,
    pub agents: AgentStore,
    pub approvals: ApprovalStore,
    pub activities: ActivityStore,
    pub sessions: SessionStore,
    pub registry: Arc<WorkflowRegistry>,
    pub dispatcher: Dispatcher,
    pub coordinator: Coordinator,
}

#[derive(Clone)]
pub struct EngineState(Arc<EngineStateInner>);

impl EngineState {
    pub fn new(
        db: Database,
        spawner: Arc<dyn SessionSpawner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let work_orders = WorkOrderStore::new(db.clone());
        let operations = OperationStore::new(db.clone());
        let agents = AgentStore::new(db.clone());
        let approvals = ApprovalStore::new(db.clone());
        let activities = ActivityStore::new(db.clone());
        let sessions = SessionStore::new(db.clone());
        let registry = Arc::new(WorkflowRegistry::builtin());

        let dispatcher = Dispatcher::new(
            db.clone(),
            work_orders.clone(),
            operations.clone(),
            agents.clone(),
            sessions.clone(),
            registry.clone(),
            spawner.clone(),
        );
        let coordinator = Coordinator::new(
            db.clone(),
            work_orders.clone(),
            operations.clone(),
            agents.clone(),
            activities.clone(),
            sessions.clone(),
            registry.clone(),
            spawner,
            notifier,
        );

        Self(Arc::new(EngineStateInner {
            db,
            work_orders,
            operations,
            agents,
            approvals,
            activities,
            sessions,
            registry,
            dispatcher,
            coordinator,
        }))
    }
}

impl std::ops::Deref for EngineState {
    type Target = EngineStateInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
