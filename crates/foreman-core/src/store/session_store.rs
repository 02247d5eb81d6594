use chrono::Utc;
use rusqlite::Row;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::SessionRecord;

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(&self, session: &SessionRecord) -> Result<(), CoreError> {
        let s = session.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (session_key, agent_ref, label, last_seen_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(session_key) DO UPDATE SET
                       agent_ref = excluded.agent_ref,
                       label = excluded.label,
                       last_seen_at = excluded.last_seen_at",
                    rusqlite::params![
                        s.session_key,
                        s.agent_ref,
                        s.label,
                        s.last_seen_at.timestamp_millis(),
                        s.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Refresh a session's last-seen timestamp.
    pub async fn touch(&self, session_key: &str) -> Result<(), CoreError> {
        let key = session_key.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE sessions SET last_seen_at = ?1 WHERE session_key = ?2",
                    rusqlite::params![now, key],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<SessionRecord>, CoreError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT session_key, agent_ref, label, last_seen_at, created_at
                     FROM sessions ORDER BY last_seen_at DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_session(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn row_to_session(row: &Row<'_>) -> SessionRecord {
    let last_seen_ms: i64 = row.get(3).unwrap_or(0);
    let created_ms: i64 = row.get(4).unwrap_or(0);

    SessionRecord {
        session_key: row.get(0).unwrap_or_default(),
        agent_ref: row.get(1).unwrap_or_default(),
        label: row.get(2).unwrap_or_default(),
        last_seen_at: chrono::DateTime::from_timestamp_millis(last_seen_ms)
            .unwrap_or_else(Utc::now),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
    }
}
