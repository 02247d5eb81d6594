use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkOrderState {
    #[serde(rename = "PLANNED")]
    Planned,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "SHIPPED")]
    Shipped,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl WorkOrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Active => "ACTIVE",
            Self::Blocked => "BLOCKED",
            Self::Review => "REVIEW",
            Self::Shipped => "SHIPPED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PLANNED" => Some(Self::Planned),
            "ACTIVE" => Some(Self::Active),
            "BLOCKED" => Some(Self::Blocked),
            "REVIEW" => Some(Self::Review),
            "SHIPPED" => Some(Self::Shipped),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never re-enter automated processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shipped | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Priority {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "URGENT")]
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "NORMAL" => Some(Self::Normal),
            "HIGH" => Some(Self::High),
            "URGENT" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OwnerKind {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "AGENT")]
    Agent,
    #[serde(rename = "SYSTEM")]
    System,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Agent => "AGENT",
            Self::System => "SYSTEM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "AGENT" => Some(Self::Agent),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

/// Reference to whoever currently owns a work order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub id: String,
}

impl OwnerRef {
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            kind: OwnerKind::Agent,
            id: id.into(),
        }
    }
}

/// Top-level requested unit of work with its own lifecycle state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub id: String,
    pub code: String,
    pub title: String,
    pub goal: String,
    pub state: WorkOrderState,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub current_stage_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    pub fn new(
        id: String,
        code: String,
        title: String,
        goal: String,
        priority: Priority,
        routing_template: Option<String>,
        workflow_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            code,
            title,
            goal,
            state: WorkOrderState::Planned,
            priority,
            owner: None,
            routing_template,
            workflow_id,
            current_stage_index: 0,
            blocked_reason: None,
            shipped_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
