use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::{OwnerKind, OwnerRef, Priority, WorkOrder, WorkOrderState};

#[derive(Clone)]
pub struct WorkOrderStore {
    db: Database,
}

impl WorkOrderStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, order: &WorkOrder) -> Result<(), CoreError> {
        let o = order.clone();
        self.db
            .with_conn_async(move |conn| Self::upsert_tx(conn, &o))
            .await
    }

    pub async fn get(&self, order_id: &str) -> Result<Option<WorkOrder>, CoreError> {
        let id = order_id.to_string();
        self.db
            .with_conn_async(move |conn| Self::get_tx(conn, &id))
            .await
    }

    /// Load up to `limit` planned work orders, oldest first. This is the
    /// dispatch loop's queue read.
    pub async fn list_planned(&self, limit: u32) -> Result<Vec<WorkOrder>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE state = 'PLANNED' ORDER BY created_at ASC LIMIT ?1",
                    SELECT
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], |row| Ok(row_to_work_order(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_by_state(&self, state: WorkOrderState) -> Result<Vec<WorkOrder>, CoreError> {
        let state_str = state.as_str().to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE state = ?1 ORDER BY created_at ASC",
                    SELECT
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![state_str], |row| {
                        Ok(row_to_work_order(row))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<WorkOrder>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY created_at ASC", SELECT))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_work_order(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn count_by_state(&self, state: WorkOrderState) -> Result<u32, CoreError> {
        let state_str = state.as_str().to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM work_orders WHERE state = ?1",
                    rusqlite::params![state_str],
                    |row| row.get::<_, u32>(0),
                )
            })
            .await
    }

    // ─── Transaction-composable helpers ─────────────────────────────────

    pub fn upsert_tx(conn: &Connection, o: &WorkOrder) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO work_orders (id, code, title, goal, state, priority, owner_kind, owner_id,
                                      routing_template, workflow_id, current_stage_index,
                                      blocked_reason, shipped_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
               code = excluded.code,
               title = excluded.title,
               goal = excluded.goal,
               state = excluded.state,
               priority = excluded.priority,
               owner_kind = excluded.owner_kind,
               owner_id = excluded.owner_id,
               routing_template = excluded.routing_template,
               workflow_id = excluded.workflow_id,
               current_stage_index = excluded.current_stage_index,
               blocked_reason = excluded.blocked_reason,
               shipped_at = excluded.shipped_at,
               updated_at = excluded.updated_at",
            rusqlite::params![
                o.id,
                o.code,
                o.title,
                o.goal,
                o.state.as_str(),
                o.priority.as_str(),
                o.owner.as_ref().map(|r| r.kind.as_str()),
                o.owner.as_ref().map(|r| r.id.clone()),
                o.routing_template,
                o.workflow_id,
                o.current_stage_index as i64,
                o.blocked_reason,
                o.shipped_at.map(|t| t.timestamp_millis()),
                o.created_at.timestamp_millis(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_tx(conn: &Connection, id: &str) -> Result<Option<WorkOrder>, rusqlite::Error> {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
        stmt.query_row(rusqlite::params![id], |row| Ok(row_to_work_order(row)))
            .optional()
    }
}

const SELECT: &str = "SELECT id, code, title, goal, state, priority, owner_kind, owner_id,
                             routing_template, workflow_id, current_stage_index,
                             blocked_reason, shipped_at, created_at, updated_at
                      FROM work_orders";

fn row_to_work_order(row: &Row<'_>) -> WorkOrder {
    let owner_kind: Option<String> = row.get(6).unwrap_or(None);
    let owner_id: Option<String> = row.get(7).unwrap_or(None);
    let owner = match (owner_kind, owner_id) {
        (Some(k), Some(id)) => OwnerKind::from_str(&k).map(|kind| OwnerRef { kind, id }),
        _ => None,
    };
    let shipped_ms: Option<i64> = row.get(12).unwrap_or(None);
    let created_ms: i64 = row.get(13).unwrap_or(0);
    let updated_ms: i64 = row.get(14).unwrap_or(0);

    WorkOrder {
        id: row.get(0).unwrap_or_default(),
        code: row.get(1).unwrap_or_default(),
        title: row.get(2).unwrap_or_default(),
        goal: row.get(3).unwrap_or_default(),
        state: WorkOrderState::from_str(&row.get::<_, String>(4).unwrap_or_default())
            .unwrap_or(WorkOrderState::Planned),
        priority: Priority::from_str(&row.get::<_, String>(5).unwrap_or_default())
            .unwrap_or(Priority::Normal),
        owner,
        routing_template: row.get(8).unwrap_or(None),
        workflow_id: row.get(9).unwrap_or(None),
        current_stage_index: row.get::<_, i64>(10).unwrap_or(0) as usize,
        blocked_reason: row.get(11).unwrap_or(None),
        shipped_at: shipped_ms.and_then(chrono::DateTime::from_timestamp_millis),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
