//! `foreman operation` — operation inspection and completion reporting.

use foreman_core::engine::{StageOutcome, StageResult};
use foreman_core::EngineState;

use super::print_json;

pub async fn list(state: &EngineState, work_order_id: &str) -> Result<(), String> {
    let operations = state
        .operations
        .list_for_work_order(work_order_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "operations": operations }));
    Ok(())
}

pub async fn complete(
    state: &EngineState,
    id: &str,
    outcome: &str,
    feedback: Option<String>,
    output: Option<String>,
    artifacts: Option<Vec<String>>,
) -> Result<(), String> {
    let outcome = match outcome {
        "approved" => StageOutcome::Approved,
        "rejected" => StageOutcome::Rejected,
        "vetoed" => StageOutcome::Vetoed,
        "completed" => StageOutcome::Completed,
        other => return Err(format!("invalid stage outcome '{}'", other)),
    };
    let result = StageResult {
        outcome,
        output,
        feedback,
        artifacts: artifacts.unwrap_or_default(),
    };

    let transition = state
        .coordinator
        .handle_agent_completion(id, result)
        .await
        .map_err(|e| e.to_string())?;

    print_json(&serde_json::json!({
        "nextAction": transition.next_action,
        "workOrder": transition.work_order,
        "newOperation": transition.new_operation,
        "approval": transition.approval,
    }));
    Ok(())
}
