use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationStatus {
    #[serde(rename = "TODO")]
    Todo,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "REWORK")]
    Rework,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Blocked => "BLOCKED",
            Self::Review => "REVIEW",
            Self::Done => "DONE",
            Self::Rework => "REWORK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TODO" => Some(Self::Todo),
            "IN_PROGRESS" => Some(Self::InProgress),
            "BLOCKED" => Some(Self::Blocked),
            "REVIEW" => Some(Self::Review),
            "DONE" => Some(Self::Done),
            "REWORK" => Some(Self::Rework),
            _ => None,
        }
    }

    /// Open statuses count toward an agent's load and keep the work order's
    /// one-open-operation invariant in force.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Todo | Self::InProgress | Self::Review | Self::Rework
        )
    }
}

/// One stage-scoped execution unit within a work order's workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub work_order_id: String,
    pub station: String,
    pub title: String,
    pub status: OperationStatus,
    pub workflow_id: String,
    pub workflow_stage_index: usize,
    pub iteration_count: u32,
    #[serde(default)]
    pub assignee_agent_ids: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loops_from_operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(
        id: String,
        work_order_id: String,
        station: String,
        title: String,
        workflow_id: String,
        workflow_stage_index: usize,
        assignee_agent_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            work_order_id,
            station,
            title,
            status: OperationStatus::Todo,
            workflow_id,
            workflow_stage_index,
            iteration_count: 0,
            assignee_agent_ids,
            depends_on: Vec::new(),
            loops_from_operation_id: None,
            escalation_reason: None,
            blocked_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
