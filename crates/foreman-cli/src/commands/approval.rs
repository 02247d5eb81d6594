//! `foreman approval` — escalation approval inspection.

use foreman_core::EngineState;

use super::print_json;

pub async fn pending(state: &EngineState) -> Result<(), String> {
    let approvals = state
        .approvals
        .list_pending()
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "approvals": approvals }));
    Ok(())
}

pub async fn list(state: &EngineState, work_order_id: &str) -> Result<(), String> {
    let approvals = state
        .approvals
        .list_for_work_order(work_order_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "approvals": approvals }));
    Ok(())
}
