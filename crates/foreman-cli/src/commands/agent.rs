//! `foreman agent` — agent management commands.

use foreman_core::models::{Agent, AgentKind, AgentStatus};
use foreman_core::EngineState;

use super::print_json;

pub async fn list(state: &EngineState) -> Result<(), String> {
    let agents = state.agents.list_all().await.map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "agents": agents }));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    state: &EngineState,
    name: &str,
    kind: &str,
    station: &str,
    wip_limit: u32,
    role_text: Option<&str>,
    capabilities: Option<Vec<String>>,
    session_key: Option<String>,
) -> Result<(), String> {
    let kind = AgentKind::from_str(kind).ok_or_else(|| format!("invalid agent kind '{}'", kind))?;
    let slug = name.to_lowercase().replace(char::is_whitespace, "-");

    let mut agent = Agent::new(
        uuid::Uuid::new_v4().to_string(),
        name.to_string(),
        slug,
        kind,
        station.to_string(),
        wip_limit,
    );
    if let Some(role_text) = role_text {
        agent.role_text = role_text.to_string();
    }
    for capability in capabilities.unwrap_or_default() {
        agent.capabilities.insert(capability, true);
    }
    agent.session_key = session_key;

    state.agents.save(&agent).await.map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "agent": agent }));
    Ok(())
}

pub async fn set_status(state: &EngineState, id: &str, status: &str) -> Result<(), String> {
    let status =
        AgentStatus::from_str(status).ok_or_else(|| format!("invalid agent status '{}'", status))?;
    state
        .agents
        .update_status(id, status)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "id": id, "status": status }));
    Ok(())
}
