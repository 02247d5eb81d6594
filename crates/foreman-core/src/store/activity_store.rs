use chrono::Utc;
use rusqlite::{Connection, Row};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::{activity_types, Activity};

/// Append-only activity sink. There is deliberately no update or delete
/// path: the audit trail is immutable.
#[derive(Clone)]
pub struct ActivityStore {
    db: Database,
}

impl ActivityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn append(&self, activity: &Activity) -> Result<(), CoreError> {
        let a = activity.clone();
        self.db
            .with_conn_async(move |conn| Self::append_tx(conn, &a))
            .await
    }

    pub async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<Activity>, CoreError> {
        let et = entity_type.to_string();
        let eid = entity_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, activity_type, actor, entity_type, entity_id, summary, payload, created_at
                     FROM activities WHERE entity_type = ?1 AND entity_id = ?2
                     ORDER BY created_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![et, eid], |row| Ok(row_to_activity(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Recover the initial context captured when a work order's workflow
    /// started. Returns the `context` object of the most recent
    /// `workflow_started` activity, if any.
    pub async fn workflow_context(
        &self,
        work_order_id: &str,
    ) -> Result<Option<serde_json::Value>, CoreError> {
        let wo_id = work_order_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM activities
                     WHERE activity_type = ?1 AND entity_type = 'work_order' AND entity_id = ?2
                     ORDER BY created_at DESC LIMIT 1",
                )?;
                let payload: Option<String> = stmt
                    .query_map(
                        rusqlite::params![activity_types::WORKFLOW_STARTED, wo_id],
                        |row| row.get(0),
                    )?
                    .next()
                    .transpose()?;
                Ok(payload
                    .and_then(|p| serde_json::from_str::<serde_json::Value>(&p).ok())
                    .and_then(|v| v.get("context").cloned()))
            })
            .await
    }

    // ─── Transaction-composable helpers ─────────────────────────────────

    pub fn append_tx(conn: &Connection, a: &Activity) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO activities (id, activity_type, actor, entity_type, entity_id, summary, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                a.id,
                a.activity_type,
                a.actor,
                a.entity_type,
                a.entity_id,
                a.summary,
                serde_json::to_string(&a.payload).unwrap_or_else(|_| "{}".into()),
                a.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_activity(row: &Row<'_>) -> Activity {
    let payload: serde_json::Value =
        serde_json::from_str(&row.get::<_, String>(6).unwrap_or_default())
            .unwrap_or(serde_json::Value::Null);
    let created_ms: i64 = row.get(7).unwrap_or(0);

    Activity {
        id: row.get(0).unwrap_or_default(),
        activity_type: row.get(1).unwrap_or_default(),
        actor: row.get(2).unwrap_or_default(),
        entity_type: row.get(3).unwrap_or_default(),
        entity_id: row.get(4).unwrap_or_default(),
        summary: row.get(5).unwrap_or_default(),
        payload,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
    }
}
