use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::Database;
use crate::error::CoreError;
use crate::models::{Approval, ApprovalStatus, ApprovalType};

#[derive(Clone)]
pub struct ApprovalStore {
    db: Database,
}

impl ApprovalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, approval_id: &str) -> Result<Option<Approval>, CoreError> {
        let id = approval_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_approval(row)))
                    .optional()
            })
            .await
    }

    pub async fn list_pending(&self) -> Result<Vec<Approval>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE status = 'PENDING' ORDER BY created_at ASC",
                    SELECT
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_approval(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_for_work_order(
        &self,
        work_order_id: &str,
    ) -> Result<Vec<Approval>, CoreError> {
        let wo_id = work_order_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE work_order_id = ?1 ORDER BY created_at ASC",
                    SELECT
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![wo_id], |row| Ok(row_to_approval(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ─── Transaction-composable helpers ─────────────────────────────────

    pub fn insert_tx(conn: &Connection, a: &Approval) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO approvals (id, work_order_id, operation_id, approval_type, question,
                                    status, resolved_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                a.id,
                a.work_order_id,
                a.operation_id,
                a.approval_type.as_str(),
                a.question,
                a.status.as_str(),
                a.resolved_by,
                a.created_at.timestamp_millis(),
                a.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

const SELECT: &str = "SELECT id, work_order_id, operation_id, approval_type, question,
                             status, resolved_by, created_at, updated_at
                      FROM approvals";

fn row_to_approval(row: &Row<'_>) -> Approval {
    let created_ms: i64 = row.get(7).unwrap_or(0);
    let updated_ms: i64 = row.get(8).unwrap_or(0);

    Approval {
        id: row.get(0).unwrap_or_default(),
        work_order_id: row.get(1).unwrap_or_default(),
        operation_id: row.get(2).unwrap_or_default(),
        approval_type: ApprovalType::from_str(&row.get::<_, String>(3).unwrap_or_default())
            .unwrap_or(ApprovalType::RiskyAction),
        question: row.get(4).unwrap_or_default(),
        status: ApprovalStatus::from_str(&row.get::<_, String>(5).unwrap_or_default())
            .unwrap_or(ApprovalStatus::Pending),
        resolved_by: row.get(6).unwrap_or(None),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}
