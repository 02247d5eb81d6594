//! `foreman dispatch` — run one automated dispatch pass.

use foreman_core::dispatch::{DispatchOptions, DispatchOutcome};
use foreman_core::EngineState;

use super::print_json;

pub async fn run(state: &EngineState, limit: u32, dry_run: bool) -> Result<(), String> {
    let outcome = state
        .dispatcher
        .run(DispatchOptions { limit, dry_run })
        .await
        .map_err(|e| e.to_string())?;

    match outcome {
        DispatchOutcome::Overlap => {
            print_json(&serde_json::json!({
                "status": "overlap",
                "note": "another dispatch pass is already running",
            }));
        }
        DispatchOutcome::Completed(report) => {
            print_json(&serde_json::json!({ "status": "completed", "report": report }));
        }
    }
    Ok(())
}
