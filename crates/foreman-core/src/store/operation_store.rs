use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::{Operation, OperationStatus};

/// SQL fragment matching the open-operation statuses. Must stay in sync
/// with `OperationStatus::is_open` and the partial unique index in db/.
const OPEN_SET: &str = "('TODO','IN_PROGRESS','REVIEW','REWORK')";

#[derive(Clone)]
pub struct OperationStore {
    db: Database,
}

impl OperationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, op: &Operation) -> Result<(), CoreError> {
        let o = op.clone();
        self.db
            .with_conn_async(move |conn| Self::upsert_tx(conn, &o))
            .await
    }

    pub async fn get(&self, op_id: &str) -> Result<Option<Operation>, CoreError> {
        let id = op_id.to_string();
        self.db
            .with_conn_async(move |conn| Self::get_tx(conn, &id))
            .await
    }

    /// All open operations across all work orders — the availability
    /// resolver's load source.
    pub async fn list_open(&self) -> Result<Vec<Operation>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE status IN {} ORDER BY created_at ASC",
                    SELECT, OPEN_SET
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_operation(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_for_work_order(
        &self,
        work_order_id: &str,
    ) -> Result<Vec<Operation>, CoreError> {
        let wo_id = work_order_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE work_order_id = ?1 ORDER BY created_at ASC",
                    SELECT
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![wo_id], |row| Ok(row_to_operation(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn open_for_work_order(
        &self,
        work_order_id: &str,
    ) -> Result<Option<Operation>, CoreError> {
        let wo_id = work_order_id.to_string();
        self.db
            .with_conn_async(move |conn| Self::open_for_work_order_tx(conn, &wo_id))
            .await
    }

    pub async fn delete(&self, op_id: &str) -> Result<(), CoreError> {
        let id = op_id.to_string();
        self.db
            .with_conn_async(move |conn| Self::delete_tx(conn, &id))
            .await
    }

    /// Mark an operation blocked with a reason. Used when a post-commit
    /// side effect (session spawn) fails.
    pub async fn set_blocked(&self, op_id: &str, reason: &str) -> Result<(), CoreError> {
        let id = op_id.to_string();
        let reason = reason.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE operations SET status = 'BLOCKED', blocked_reason = ?1, updated_at = ?2
                     WHERE id = ?3",
                    rusqlite::params![reason, now, id],
                )?;
                Ok(())
            })
            .await
    }

    // ─── Transaction-composable helpers ─────────────────────────────────

    pub fn upsert_tx(conn: &Connection, o: &Operation) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO operations (id, work_order_id, station, title, status, workflow_id,
                                     workflow_stage_index, iteration_count, assignee_agent_ids,
                                     depends_on, loops_from_operation_id, escalation_reason,
                                     blocked_reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
               station = excluded.station,
               title = excluded.title,
               status = excluded.status,
               workflow_id = excluded.workflow_id,
               workflow_stage_index = excluded.workflow_stage_index,
               iteration_count = excluded.iteration_count,
               assignee_agent_ids = excluded.assignee_agent_ids,
               depends_on = excluded.depends_on,
               loops_from_operation_id = excluded.loops_from_operation_id,
               escalation_reason = excluded.escalation_reason,
               blocked_reason = excluded.blocked_reason,
               updated_at = excluded.updated_at",
            rusqlite::params![
                o.id,
                o.work_order_id,
                o.station,
                o.title,
                o.status.as_str(),
                o.workflow_id,
                o.workflow_stage_index as i64,
                o.iteration_count,
                serde_json::to_string(&o.assignee_agent_ids).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&o.depends_on).unwrap_or_else(|_| "[]".into()),
                o.loops_from_operation_id,
                o.escalation_reason,
                o.blocked_reason,
                o.created_at.timestamp_millis(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_tx(conn: &Connection, id: &str) -> Result<Option<Operation>, rusqlite::Error> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
        stmt.query_row(rusqlite::params![id], |row| Ok(row_to_operation(row)))
            .optional()
    }

    pub fn open_for_work_order_tx(
        conn: &Connection,
        work_order_id: &str,
    ) -> Result<Option<Operation>, rusqlite::Error> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE work_order_id = ?1 AND status IN {} LIMIT 1",
            SELECT, OPEN_SET
        ))?;
        stmt.query_row(rusqlite::params![work_order_id], |row| {
            Ok(row_to_operation(row))
        })
        .optional()
    }

    pub fn delete_tx(conn: &Connection, id: &str) -> Result<(), rusqlite::Error> {
        conn.execute("DELETE FROM operations WHERE id = ?1", rusqlite::params![id])?;
        Ok(())
    }
}

const SELECT: &str = "SELECT id, work_order_id, station, title, status, workflow_id,
                             workflow_stage_index, iteration_count, assignee_agent_ids,
                             depends_on, loops_from_operation_id, escalation_reason,
                             blocked_reason, created_at, updated_at
                      FROM operations";

fn row_to_operation(row: &Row<'_>) -> Operation {
    let assignees: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(8).unwrap_or_default()).unwrap_or_default();
    let depends_on: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(9).unwrap_or_default()).unwrap_or_default();
    let created_ms: i64 = row.get(13).unwrap_or(0);
    let updated_ms: i64 = row.get(14).unwrap_or(0);

    Operation {
        id: row.get(0).unwrap_or_default(),
        work_order_id: row.get(1).unwrap_or_default(),
        station: row.get(2).unwrap_or_default(),
        title: row.get(3).unwrap_or_default(),
        status: OperationStatus::from_str(&row.get::<_, String>(4).unwrap_or_default())
            .unwrap_or(OperationStatus::Todo),
        workflow_id: row.get(5).unwrap_or_default(),
        workflow_stage_index: row.get::<_, i64>(6).unwrap_or(0) as usize,
        iteration_count: row.get(7).unwrap_or(0),
        assignee_agent_ids: assignees,
        depends_on,
        loops_from_operation_id: row.get(10).unwrap_or(None),
        escalation_reason: row.get(11).unwrap_or(None),
        blocked_reason: row.get(12).unwrap_or(None),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
