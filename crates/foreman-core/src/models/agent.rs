use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentKind {
    #[serde(rename = "WORKER")]
    Worker,
    #[serde(rename = "MANAGER")]
    Manager,
    #[serde(rename = "CEO")]
    Ceo,
    #[serde(rename = "GUARD")]
    Guard,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "WORKER",
            Self::Manager => "MANAGER",
            Self::Ceo => "CEO",
            Self::Guard => "GUARD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "WORKER" => Some(Self::Worker),
            "MANAGER" => Some(Self::Manager),
            "CEO" => Some(Self::Ceo),
            "GUARD" => Some(Self::Guard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentStatus {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "ERROR")]
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
            Self::Blocked => "BLOCKED",
            Self::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(Self::Idle),
            "ACTIVE" => Some(Self::Active),
            "BLOCKED" => Some(Self::Blocked),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// An autonomous worker with a capability/station profile and a
/// concurrency budget (`wip_limit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    pub kind: AgentKind,
    pub dispatch_eligible: bool,
    pub station: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub role_text: String,
    /// Named boolean capability flags, e.g. {"delegation": true}.
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    pub wip_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        id: String,
        display_name: String,
        slug: String,
        kind: AgentKind,
        station: String,
        wip_limit: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name,
            slug,
            runtime_id: None,
            kind,
            dispatch_eligible: kind == AgentKind::Worker,
            station,
            status: AgentStatus::Idle,
            role_text: String::new(),
            capabilities: HashMap::new(),
            wip_limit,
            session_key: None,
            model_hint: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if the agent holds the named capability flag.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.get(name).copied().unwrap_or(false)
    }
}
