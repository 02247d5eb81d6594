use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live execution session as last reported by the runner.
///
/// Session rows feed the availability resolver's freshness window: an agent
/// whose session was seen recently counts as loaded even before its
/// operation row lands, which prevents double-booking mid-spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_key: String,
    pub agent_ref: String,
    #[serde(default)]
    pub label: String,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_key: String, agent_ref: String, label: String) -> Self {
        let now = Utc::now();
        Self {
            session_key,
            agent_ref,
            label,
            last_seen_at: now,
            created_at: now,
        }
    }
}
