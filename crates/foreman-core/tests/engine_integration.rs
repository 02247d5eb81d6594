//! End-to-end engine tests against an in-memory database with a mocked
//! runner: dispatch batch behavior, the workflow state machine, and the
//! post-commit effect handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use foreman_core::dispatch::{DispatchOptions, DispatchOutcome, DispatchReport};
use foreman_core::engine::{NextAction, StageResult};
use foreman_core::error::CoreError;
use foreman_core::models::{
    activity_types, Agent, AgentKind, ApprovalStatus, ApprovalType, Operation, OperationStatus,
    OwnerKind, Priority, WorkOrder, WorkOrderState,
};
use foreman_core::session::{Notifier, SessionSpawner, SpawnRequest, SpawnedSession};
use foreman_core::workflow::WorkflowContext;
use foreman_core::{Database, EngineState};

struct MockSpawner {
    calls: Mutex<Vec<SpawnRequest>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockSpawner {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionSpawner for MockSpawner {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedSession, CoreError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(request);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Spawn("runner offline".into()));
        }
        Ok(SpawnedSession {
            session_key: format!("sess-{}", uuid::Uuid::new_v4()),
            session_id: None,
        })
    }
}

struct MockNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, session_key: &str, message: &str) -> Result<(), CoreError> {
        self.messages
            .lock()
            .unwrap()
            .push((session_key.to_string(), message.to_string()));
        Ok(())
    }
}

struct Harness {
    state: EngineState,
    spawner: Arc<MockSpawner>,
    notifier: Arc<MockNotifier>,
}

fn harness() -> Harness {
    let db = Database::open_in_memory().expect("in-memory db");
    let spawner = Arc::new(MockSpawner::new());
    let notifier = Arc::new(MockNotifier::new());
    let state = EngineState::new(db, spawner.clone(), notifier.clone());
    Harness {
        state,
        spawner,
        notifier,
    }
}

fn worker(id: &str, name: &str, station: &str, wip_limit: u32) -> Agent {
    Agent::new(
        id.into(),
        name.into(),
        name.to_lowercase().replace(' ', "-"),
        AgentKind::Worker,
        station.into(),
        wip_limit,
    )
}

fn order(id: &str, code: &str, title: &str, template: Option<&str>) -> WorkOrder {
    WorkOrder::new(
        id.into(),
        code.into(),
        title.into(),
        format!("Goal for {}", code),
        Priority::Normal,
        template.map(String::from),
        None,
    )
}

async fn report(h: &Harness, options: DispatchOptions) -> DispatchReport {
    match h.state.dispatcher.run(options).await.expect("dispatch run") {
        DispatchOutcome::Completed(report) => report,
        DispatchOutcome::Overlap => panic!("unexpected overlap"),
    }
}

#[tokio::test]
async fn test_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreman.db").to_string_lossy().to_string();

    {
        let db = Database::open(&path).unwrap();
        let state = EngineState::new(
            db,
            Arc::new(MockSpawner::new()),
            Arc::new(MockNotifier::new()),
        );
        state
            .agents
            .save(&worker("a1", "Build Bot", "build", 2))
            .await
            .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let state = EngineState::new(
        db,
        Arc::new(MockSpawner::new()),
        Arc::new(MockNotifier::new()),
    );
    let agents = state.agents.list_all().await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].id, "a1");
}

#[tokio::test]
async fn test_dispatch_assigns_best_build_agent() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 2))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a2", "QA Bot", "qa", 1))
        .await
        .unwrap();

    // A second, already-active work order keeps the QA agent at capacity.
    let mut busy_order = order("wo-2", "WO-2", "Verify widget", None);
    busy_order.state = WorkOrderState::Active;
    h.state.work_orders.save(&busy_order).await.unwrap();
    let mut busy_op = Operation::new(
        "op-busy".into(),
        "wo-2".into(),
        "review".into(),
        "Verify widget".into(),
        "bug_fix".into(),
        1,
        vec!["a2".into()],
    );
    busy_op.status = OperationStatus::InProgress;
    h.state.operations.save(&busy_op).await.unwrap();

    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", Some("bug_fix")))
        .await
        .unwrap();

    let report = report(&h, DispatchOptions::default()).await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.assignments[0].agent_id, "a1");
    assert_eq!(report.summary.eligible_agents, 1);

    let dispatched = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(dispatched.state, WorkOrderState::Active);
    let owner = dispatched.owner.expect("owner set");
    assert_eq!(owner.kind, OwnerKind::Agent);
    assert_eq!(owner.id, "a1");

    let open = h
        .state
        .operations
        .open_for_work_order("wo-1")
        .await
        .unwrap()
        .expect("open operation");
    assert_eq!(open.assignee_agent_ids, vec!["a1".to_string()]);
    assert_eq!(open.workflow_id, "bug_fix");
    assert_eq!(open.workflow_stage_index, 0);
    assert_eq!(h.spawner.call_count(), 1);
}

#[tokio::test]
async fn test_dispatch_is_idempotent() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 5))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", Some("bug_fix")))
        .await
        .unwrap();

    let first = report(&h, DispatchOptions::default()).await;
    assert_eq!(first.dispatched, 1);

    let second = report(&h, DispatchOptions::default()).await;
    assert_eq!(second.scanned, 0);
    assert_eq!(second.dispatched, 0);

    // A planned order that somehow still carries an open operation is
    // skipped rather than double-assigned.
    h.state
        .work_orders
        .save(&order("wo-3", "WO-3", "Another fix", Some("bug_fix")))
        .await
        .unwrap();
    h.state
        .operations
        .save(&Operation::new(
            "op-3".into(),
            "wo-3".into(),
            "build".into(),
            "Another fix".into(),
            "bug_fix".into(),
            0,
            vec!["a1".into()],
        ))
        .await
        .unwrap();

    let third = report(&h, DispatchOptions::default()).await;
    assert_eq!(third.dispatched, 0);
    assert_eq!(third.skipped, 1);
    assert!(third.skips[0].reason.contains("open operation"));
}

#[tokio::test]
async fn test_dispatch_dry_run_persists_nothing() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 2))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", Some("bug_fix")))
        .await
        .unwrap();

    let report = report(
        &h,
        DispatchOptions {
            limit: 10,
            dry_run: true,
        },
    )
    .await;
    assert_eq!(report.dispatched, 1);
    assert!(report.assignments[0].dry_run);
    assert!(report.assignments[0].operation_id.is_none());

    let untouched = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(untouched.state, WorkOrderState::Planned);
    assert!(h
        .state
        .operations
        .open_for_work_order("wo-1")
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.spawner.call_count(), 0);
}

#[tokio::test]
async fn test_dispatch_dry_run_caps_agent_within_batch() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 1))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "First fix", Some("bug_fix")))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-2", "WO-2", "Second fix", Some("bug_fix")))
        .await
        .unwrap();

    let report = report(
        &h,
        DispatchOptions {
            limit: 10,
            dry_run: true,
        },
    )
    .await;
    // The lone agent has wip_limit 1: the second order finds nobody.
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_dispatch_spawn_failure_returns_order_to_queue() {
    let h = harness();
    h.spawner.set_fail(true);
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 2))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", Some("bug_fix")))
        .await
        .unwrap();

    let report = report(&h, DispatchOptions::default()).await;
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].error.contains("runner offline"));

    // Compensation: the operation is gone and the order is queued again.
    let requeued = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(requeued.state, WorkOrderState::Planned);
    assert!(h
        .state
        .operations
        .open_for_work_order("wo-1")
        .await
        .unwrap()
        .is_none());

    let activities = h
        .state
        .activities
        .list_for_entity("work_order", "wo-1")
        .await
        .unwrap();
    assert!(activities
        .iter()
        .any(|a| a.activity_type == activity_types::DISPATCH_FAILED));

    // Once the runner recovers the same order dispatches cleanly.
    h.spawner.set_fail(false);
    let retry = match h
        .state
        .dispatcher
        .run(DispatchOptions::default())
        .await
        .unwrap()
    {
        DispatchOutcome::Completed(report) => report,
        DispatchOutcome::Overlap => panic!("unexpected overlap"),
    };
    assert_eq!(retry.dispatched, 1);
}

#[tokio::test]
async fn test_dispatch_overlap_guard() {
    let h = harness();
    h.spawner.set_delay(Duration::from_millis(300));
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 2))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", Some("bug_fix")))
        .await
        .unwrap();

    let state = h.state.clone();
    let background =
        tokio::spawn(async move { state.dispatcher.run(DispatchOptions::default()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let overlapping = h.state.dispatcher.run(DispatchOptions::default()).await.unwrap();
    assert!(matches!(overlapping, DispatchOutcome::Overlap));

    let original = background.await.unwrap().unwrap();
    assert!(matches!(original, DispatchOutcome::Completed(_)));
}

#[tokio::test]
async fn test_workflow_round_trip_ships_order() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a2", "QA Bot", "review", 3))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", None))
        .await
        .unwrap();

    // No deployment flag, so the optional deploy stage is skipped.
    let first = h
        .state
        .coordinator
        .initiate_workflow("wo-1", Some("bug_fix"), WorkflowContext::new())
        .await
        .unwrap()
        .expect("first operation");
    assert_eq!(first.workflow_stage_index, 0);

    let advanced = h
        .state
        .coordinator
        .handle_agent_completion(&first.id, StageResult::approved())
        .await
        .unwrap();
    assert_eq!(advanced.next_action, NextAction::Continue);
    let review = advanced.new_operation.expect("review operation");
    assert_eq!(review.workflow_stage_index, 1);

    let finished = h
        .state
        .coordinator
        .handle_agent_completion(&review.id, StageResult::approved())
        .await
        .unwrap();
    assert_eq!(finished.next_action, NextAction::Complete);

    let shipped = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(shipped.state, WorkOrderState::Shipped);
    assert!(shipped.shipped_at.is_some());

    // Operation count equals the number of non-skipped stages.
    let all_ops = h.state.operations.list_for_work_order("wo-1").await.unwrap();
    assert_eq!(all_ops.len(), 2);
    assert!(all_ops.iter().all(|op| op.status == OperationStatus::Done));

    let activities = h
        .state
        .activities
        .list_for_entity("work_order", "wo-1")
        .await
        .unwrap();
    assert!(activities
        .iter()
        .any(|a| a.activity_type == activity_types::STAGE_SKIPPED));
    assert!(activities
        .iter()
        .any(|a| a.activity_type == activity_types::WORKFLOW_COMPLETED));

    // A duplicate completion for an already-done operation is refused.
    let replay = h
        .state
        .coordinator
        .handle_agent_completion(&review.id, StageResult::approved())
        .await;
    assert!(matches!(replay, Err(CoreError::InvalidState(_))));
}

#[tokio::test]
async fn test_review_rejection_loops_back() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a2", "QA Bot", "review", 3))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", None))
        .await
        .unwrap();

    let build = h
        .state
        .coordinator
        .initiate_workflow("wo-1", Some("bug_fix"), WorkflowContext::new())
        .await
        .unwrap()
        .unwrap();
    let review = h
        .state
        .coordinator
        .handle_agent_completion(&build.id, StageResult::approved())
        .await
        .unwrap()
        .new_operation
        .unwrap();

    let looped = h
        .state
        .coordinator
        .handle_agent_completion(&review.id, StageResult::rejected("tests missing"))
        .await
        .unwrap();
    assert_eq!(looped.next_action, NextAction::Loop);

    let rework = looped.new_operation.expect("rework operation");
    assert_eq!(rework.workflow_stage_index, 0);
    assert_eq!(rework.status, OperationStatus::Rework);
    assert_eq!(rework.iteration_count, 1);
    assert_eq!(rework.loops_from_operation_id.as_deref(), Some(review.id.as_str()));

    let reset = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(reset.state, WorkOrderState::Active);
    assert_eq!(reset.current_stage_index, 0);
}

#[tokio::test]
async fn test_loop_cap_escalates_instead_of_looping() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a2", "QA Bot", "review", 3))
        .await
        .unwrap();

    let mut wo = order("wo-1", "WO-1", "Fix login crash", None);
    wo.state = WorkOrderState::Active;
    wo.workflow_id = Some("bug_fix".into());
    wo.current_stage_index = 1;
    h.state.work_orders.save(&wo).await.unwrap();

    // A review operation that already burned both loop iterations.
    let mut review = Operation::new(
        "op-review".into(),
        "wo-1".into(),
        "review".into(),
        "Verify Fix: Fix login crash".into(),
        "bug_fix".into(),
        1,
        vec!["a2".into()],
    );
    review.status = OperationStatus::InProgress;
    review.iteration_count = 2;
    h.state.operations.save(&review).await.unwrap();

    let outcome = h
        .state
        .coordinator
        .handle_agent_completion("op-review", StageResult::rejected("still broken"))
        .await
        .unwrap();
    assert_eq!(outcome.next_action, NextAction::Escalate);
    assert!(outcome.new_operation.is_none());

    let approval = outcome.approval.expect("approval created");
    assert_eq!(approval.approval_type, ApprovalType::ScopeChange);
    assert_eq!(approval.status, ApprovalStatus::Pending);

    let blocked = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(blocked.state, WorkOrderState::Blocked);
    assert_eq!(blocked.blocked_reason.as_deref(), Some("iteration_cap_exceeded"));
    assert!(h
        .state
        .operations
        .open_for_work_order("wo-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_completion_on_escalated_operation_is_refused() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a2", "QA Bot", "review", 3))
        .await
        .unwrap();

    let mut wo = order("wo-1", "WO-1", "Fix login crash", None);
    wo.state = WorkOrderState::Active;
    wo.workflow_id = Some("bug_fix".into());
    wo.current_stage_index = 1;
    h.state.work_orders.save(&wo).await.unwrap();

    let mut review = Operation::new(
        "op-review".into(),
        "wo-1".into(),
        "review".into(),
        "Verify Fix: Fix login crash".into(),
        "bug_fix".into(),
        1,
        vec!["a2".into()],
    );
    review.status = OperationStatus::InProgress;
    review.iteration_count = 2;
    h.state.operations.save(&review).await.unwrap();

    let escalated = h
        .state
        .coordinator
        .handle_agent_completion("op-review", StageResult::rejected("still broken"))
        .await
        .unwrap();
    assert_eq!(escalated.next_action, NextAction::Escalate);

    // A replayed or stray completion for the escalated operation must not
    // move the machine while the approval is pending.
    let replay = h
        .state
        .coordinator
        .handle_agent_completion("op-review", StageResult::approved())
        .await;
    assert!(matches!(replay, Err(CoreError::InvalidState(_))));

    let blocked = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(blocked.state, WorkOrderState::Blocked);
    let approvals = h.state.approvals.list_for_work_order("wo-1").await.unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].status, ApprovalStatus::Pending);
    assert!(h
        .state
        .operations
        .open_for_work_order("wo-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_veto_creates_exactly_one_pending_approval() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Sec Bot", "security", 3))
        .await
        .unwrap();
    let mut guard = Agent::new(
        "g1".into(),
        "Gatekeeper".into(),
        "gatekeeper".into(),
        AgentKind::Guard,
        "security".into(),
        2,
    );
    guard.dispatch_eligible = false;
    h.state.agents.save(&guard).await.unwrap();

    let mut ceo = Agent::new(
        "c1".into(),
        "Chief".into(),
        "ceo".into(),
        AgentKind::Ceo,
        "executive".into(),
        1,
    );
    ceo.session_key = Some("sess-ceo".into());
    ceo.dispatch_eligible = false;
    h.state.agents.save(&ceo).await.unwrap();

    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Audit payment flow", None))
        .await
        .unwrap();

    let audit = h
        .state
        .coordinator
        .initiate_workflow("wo-1", Some("security_audit"), WorkflowContext::new())
        .await
        .unwrap()
        .unwrap();
    let verdict = h
        .state
        .coordinator
        .handle_agent_completion(&audit.id, StageResult::approved())
        .await
        .unwrap()
        .new_operation
        .unwrap();
    assert_eq!(verdict.assignee_agent_ids, vec!["g1".to_string()]);

    let outcome = h
        .state
        .coordinator
        .handle_agent_completion(&verdict.id, StageResult::vetoed("credentials in logs"))
        .await
        .unwrap();
    assert_eq!(outcome.next_action, NextAction::Escalate);

    let approvals = h.state.approvals.list_for_work_order("wo-1").await.unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].approval_type, ApprovalType::RiskyAction);
    assert_eq!(approvals[0].status, ApprovalStatus::Pending);

    let blocked = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(blocked.state, WorkOrderState::Blocked);
    assert_eq!(blocked.blocked_reason.as_deref(), Some("security_veto"));

    // The escalation brief lands with the oversight agent.
    let messages = h.notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "sess-ceo");
    assert!(messages[0].1.contains("security_veto"));
}

#[tokio::test]
async fn test_initiate_spawn_failure_blocks_operation_but_keeps_transition() {
    let h = harness();
    h.spawner.set_fail(true);
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", None))
        .await
        .unwrap();

    let op = h
        .state
        .coordinator
        .initiate_workflow("wo-1", Some("bug_fix"), WorkflowContext::new())
        .await
        .unwrap()
        .expect("operation committed despite spawn failure");
    assert_eq!(op.status, OperationStatus::Blocked);
    assert!(op.blocked_reason.as_deref().unwrap_or("").contains("runner offline"));

    // The initiation itself stands.
    let active = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(active.state, WorkOrderState::Active);
    assert_eq!(active.workflow_id.as_deref(), Some("bug_fix"));

    let activities = h
        .state
        .activities
        .list_for_entity("operation", &op.id)
        .await
        .unwrap();
    assert!(activities
        .iter()
        .any(|a| a.activity_type == activity_types::OPERATION_BLOCKED));
}

#[tokio::test]
async fn test_initiate_refuses_finished_or_busy_order() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();

    let mut done = order("wo-1", "WO-1", "Old work", None);
    done.state = WorkOrderState::Shipped;
    h.state.work_orders.save(&done).await.unwrap();

    let refused = h
        .state
        .coordinator
        .initiate_workflow("wo-1", Some("bug_fix"), WorkflowContext::new())
        .await;
    assert!(matches!(refused, Err(CoreError::InvalidState(_))));
    let untouched = h.state.work_orders.get("wo-1").await.unwrap().unwrap();
    assert_eq!(untouched.state, WorkOrderState::Shipped);

    // An order mid-flight keeps its single open operation.
    let mut busy = order("wo-2", "WO-2", "In-flight work", None);
    busy.state = WorkOrderState::Active;
    h.state.work_orders.save(&busy).await.unwrap();
    h.state
        .operations
        .save(&Operation::new(
            "op-2".into(),
            "wo-2".into(),
            "build".into(),
            "In-flight work".into(),
            "bug_fix".into(),
            0,
            vec!["a1".into()],
        ))
        .await
        .unwrap();

    let refused = h
        .state
        .coordinator
        .initiate_workflow("wo-2", Some("bug_fix"), WorkflowContext::new())
        .await;
    assert!(matches!(refused, Err(CoreError::InvalidState(_))));
}

#[tokio::test]
async fn test_context_flag_keeps_optional_stage() {
    let h = harness();
    h.state
        .agents
        .save(&worker("a1", "Build Bot", "build", 3))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a2", "QA Bot", "review", 3))
        .await
        .unwrap();
    h.state
        .agents
        .save(&worker("a3", "Ops Bot", "ops", 3))
        .await
        .unwrap();
    h.state
        .work_orders
        .save(&order("wo-1", "WO-1", "Fix login crash", None))
        .await
        .unwrap();

    let context = WorkflowContext::new().with_flag("deployment_needed", true);
    let build = h
        .state
        .coordinator
        .initiate_workflow("wo-1", Some("bug_fix"), context)
        .await
        .unwrap()
        .unwrap();
    let review = h
        .state
        .coordinator
        .handle_agent_completion(&build.id, StageResult::approved())
        .await
        .unwrap()
        .new_operation
        .unwrap();

    // With the flag captured at start, review now advances into deploy
    // instead of completing.
    let outcome = h
        .state
        .coordinator
        .handle_agent_completion(&review.id, StageResult::approved())
        .await
        .unwrap();
    assert_eq!(outcome.next_action, NextAction::Continue);
    let deploy = outcome.new_operation.unwrap();
    assert_eq!(deploy.workflow_stage_index, 2);
    assert_eq!(deploy.assignee_agent_ids, vec!["a3".to_string()]);
}
