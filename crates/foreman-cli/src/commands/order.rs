//! `foreman order` — work order management commands.

use foreman_core::models::{Priority, WorkOrder, WorkOrderState};
use foreman_core::workflow::WorkflowContext;
use foreman_core::EngineState;

use super::print_json;

pub async fn list(state: &EngineState, filter: Option<&str>) -> Result<(), String> {
    let orders = match filter {
        Some(s) => {
            let wanted = WorkOrderState::from_str(s)
                .ok_or_else(|| format!("invalid work order state '{}'", s))?;
            state
                .work_orders
                .list_by_state(wanted)
                .await
                .map_err(|e| e.to_string())?
        }
        None => state.work_orders.list_all().await.map_err(|e| e.to_string())?,
    };
    print_json(&serde_json::json!({ "workOrders": orders }));
    Ok(())
}

pub async fn create(
    state: &EngineState,
    code: &str,
    title: &str,
    goal: &str,
    priority: &str,
    template: Option<String>,
    workflow: Option<String>,
) -> Result<(), String> {
    let priority =
        Priority::from_str(priority).ok_or_else(|| format!("invalid priority '{}'", priority))?;
    if let Some(workflow) = &workflow {
        if !state.registry.contains(workflow) {
            return Err(format!("unknown workflow '{}'", workflow));
        }
    }

    let order = WorkOrder::new(
        uuid::Uuid::new_v4().to_string(),
        code.to_string(),
        title.to_string(),
        goal.to_string(),
        priority,
        template,
        workflow,
    );
    state
        .work_orders
        .save(&order)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "workOrder": order }));
    Ok(())
}

pub async fn get(state: &EngineState, id: &str) -> Result<(), String> {
    let order = state
        .work_orders
        .get(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("work order '{}' not found", id))?;
    let operations = state
        .operations
        .list_for_work_order(id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({
        "workOrder": order,
        "operations": operations,
    }));
    Ok(())
}

pub async fn initiate(
    state: &EngineState,
    id: &str,
    workflow: Option<&str>,
    flags: Option<Vec<String>>,
) -> Result<(), String> {
    let mut context = WorkflowContext::new();
    for flag in flags.unwrap_or_default() {
        context = context.with_flag(flag, true);
    }

    let operation = state
        .coordinator
        .initiate_workflow(id, workflow, context)
        .await
        .map_err(|e| e.to_string())?;

    match operation {
        Some(operation) => print_json(&serde_json::json!({ "operation": operation })),
        None => print_json(&serde_json::json!({
            "operation": null,
            "note": "no applicable stages, work order shipped immediately",
        })),
    }
    Ok(())
}
