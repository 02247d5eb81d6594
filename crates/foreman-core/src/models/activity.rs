use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activity type constants used by the engine.
pub mod activity_types {
    pub const WORK_ORDER_DISPATCHED: &str = "work_order_dispatched";
    pub const DISPATCH_FAILED: &str = "dispatch_failed";
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    pub const STAGE_ADVANCED: &str = "stage_advanced";
    pub const STAGE_SKIPPED: &str = "stage_skipped";
    pub const STAGE_LOOPED: &str = "stage_looped";
    pub const WORKFLOW_ESCALATED: &str = "workflow_escalated";
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    pub const OPERATION_BLOCKED: &str = "operation_blocked";
    pub const COMPLETION_RECEIVED: &str = "completion_received";
}

/// Append-only audit entry. Activities are written on every transition and
/// never mutated; the `workflow_started` payload doubles as the recovery
/// source for a workflow's captured initial context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub activity_type: String,
    pub actor: String,
    pub entity_type: String,
    pub entity_id: String,
    pub summary: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        activity_type: impl Into<String>,
        actor: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        summary: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            activity_type: activity_type.into(),
            actor: actor.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            summary: summary.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
