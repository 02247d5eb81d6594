use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApprovalType {
    #[serde(rename = "RISKY_ACTION")]
    RiskyAction,
    #[serde(rename = "SCOPE_CHANGE")]
    ScopeChange,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiskyAction => "RISKY_ACTION",
            Self::ScopeChange => "SCOPE_CHANGE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RISKY_ACTION" => Some(Self::RiskyAction),
            "SCOPE_CHANGE" => Some(Self::ScopeChange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApprovalStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Escalation record. A pending approval is terminal for automation:
/// nothing advances the work order until an external decision lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: String,
    pub work_order_id: String,
    pub operation_id: String,
    pub approval_type: ApprovalType,
    pub question: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn pending(
        id: String,
        work_order_id: String,
        operation_id: String,
        approval_type: ApprovalType,
        question: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            work_order_id,
            operation_id,
            approval_type,
            question,
            status: ApprovalStatus::Pending,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
