//! `foreman workflow` — workflow definition inspection.

use foreman_core::EngineState;

use super::print_json;

pub async fn list(state: &EngineState) -> Result<(), String> {
    let mut workflows = Vec::new();
    for id in state.registry.ids() {
        let definition = state.registry.get(id).map_err(|e| e.to_string())?;
        let stages: Vec<serde_json::Value> = definition
            .stages
            .iter()
            .map(|stage| {
                serde_json::json!({
                    "key": stage.key,
                    "title": stage.title,
                    "role": stage.role,
                    "optional": stage.optional,
                    "condition": stage.condition,
                    "canVeto": stage.can_veto,
                    "loopTarget": stage.loop_target,
                    "maxIterations": stage.max_iterations,
                })
            })
            .collect();
        workflows.push(serde_json::json!({
            "id": definition.id,
            "name": definition.name,
            "stages": stages,
        }));
    }
    print_json(&serde_json::json!({ "workflows": workflows }));
    Ok(())
}
