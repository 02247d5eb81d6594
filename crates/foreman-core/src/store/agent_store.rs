use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use std::collections::HashMap;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::{Agent, AgentKind, AgentStatus};

#[derive(Clone)]
pub struct AgentStore {
    db: Database,
}

impl AgentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, agent: &Agent) -> Result<(), CoreError> {
        let a = agent.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO agents (id, display_name, slug, runtime_id, kind, dispatch_eligible,
                                         station, status, role_text, capabilities, wip_limit,
                                         session_key, model_hint, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT(id) DO UPDATE SET
                       display_name = excluded.display_name,
                       slug = excluded.slug,
                       runtime_id = excluded.runtime_id,
                       kind = excluded.kind,
                       dispatch_eligible = excluded.dispatch_eligible,
                       station = excluded.station,
                       status = excluded.status,
                       role_text = excluded.role_text,
                       capabilities = excluded.capabilities,
                       wip_limit = excluded.wip_limit,
                       session_key = excluded.session_key,
                       model_hint = excluded.model_hint,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        a.id,
                        a.display_name,
                        a.slug,
                        a.runtime_id,
                        a.kind.as_str(),
                        a.dispatch_eligible,
                        a.station,
                        a.status.as_str(),
                        a.role_text,
                        serde_json::to_string(&a.capabilities).unwrap_or_else(|_| "{}".into()),
                        a.wip_limit,
                        a.session_key,
                        a.model_hint,
                        a.created_at.timestamp_millis(),
                        Utc::now().timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Agent>, CoreError> {
        let id = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_agent(row)))
                    .optional()
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Agent>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY display_name ASC", SELECT))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_agent(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<(), CoreError> {
        let id = agent_id.to_string();
        let status_str = status.as_str().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status_str, now, id],
                )?;
                Ok(())
            })
            .await
    }
}

const SELECT: &str = "SELECT id, display_name, slug, runtime_id, kind, dispatch_eligible,
                             station, status, role_text, capabilities, wip_limit,
                             session_key, model_hint, created_at, updated_at
                      FROM agents";

fn row_to_agent(row: &Row<'_>) -> Agent {
    let capabilities: HashMap<String, bool> =
        serde_json::from_str(&row.get::<_, String>(9).unwrap_or_default()).unwrap_or_default();
    let created_ms: i64 = row.get(13).unwrap_or(0);
    let updated_ms: i64 = row.get(14).unwrap_or(0);

    Agent {
        id: row.get(0).unwrap_or_default(),
        display_name: row.get(1).unwrap_or_default(),
        slug: row.get(2).unwrap_or_default(),
        runtime_id: row.get(3).unwrap_or(None),
        kind: AgentKind::from_str(&row.get::<_, String>(4).unwrap_or_default())
            .unwrap_or(AgentKind::Worker),
        dispatch_eligible: row.get(5).unwrap_or(false),
        station: row.get(6).unwrap_or_default(),
        status: AgentStatus::from_str(&row.get::<_, String>(7).unwrap_or_default())
            .unwrap_or(AgentStatus::Idle),
        role_text: row.get(8).unwrap_or_default(),
        capabilities,
        wip_limit: row.get(10).unwrap_or(1),
        session_key: row.get(11).unwrap_or(None),
        model_hint: row.get(12).unwrap_or(None),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
