//! SQLite database layer for the Foreman engine.
//!
//! Uses rusqlite with WAL mode for concurrent read performance.
//! All database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime. Multi-row state transitions go
//! through [`Database::with_tx_async`], which wraps the closure in a single
//! transaction: any error rolls the whole transition back.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::CoreError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, CoreError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| CoreError::Database(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| CoreError::Database(format!("Task join error: {}", e)))?
    }

    /// Execute a closure inside a single transaction (async-friendly).
    ///
    /// The closure receives a [`rusqlite::Transaction`] which derefs to
    /// `Connection`, so the same `*_tx` store helpers compose here. The
    /// transaction commits when the closure returns `Ok` and rolls back
    /// on any error.
    pub async fn with_tx_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .conn
                .lock()
                .map_err(|e| CoreError::Database(format!("Lock poisoned: {}", e)))?;
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CoreError::Database(e.to_string()))?;
            let out = f(&tx).map_err(|e| CoreError::Database(e.to_string()))?;
            tx.commit().map_err(|e| CoreError::Database(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| CoreError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS work_orders (
                    id                  TEXT PRIMARY KEY,
                    code                TEXT NOT NULL,
                    title               TEXT NOT NULL,
                    goal                TEXT NOT NULL DEFAULT '',
                    state               TEXT NOT NULL DEFAULT 'PLANNED',
                    priority            TEXT NOT NULL DEFAULT 'NORMAL',
                    owner_kind          TEXT,
                    owner_id            TEXT,
                    routing_template    TEXT,
                    workflow_id         TEXT,
                    current_stage_index INTEGER NOT NULL DEFAULT 0,
                    blocked_reason      TEXT,
                    shipped_at          INTEGER,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_work_orders_state ON work_orders(state);

                CREATE TABLE IF NOT EXISTS operations (
                    id                      TEXT PRIMARY KEY,
                    work_order_id           TEXT NOT NULL REFERENCES work_orders(id) ON DELETE CASCADE,
                    station                 TEXT NOT NULL,
                    title                   TEXT NOT NULL,
                    status                  TEXT NOT NULL DEFAULT 'TODO',
                    workflow_id             TEXT NOT NULL,
                    workflow_stage_index    INTEGER NOT NULL DEFAULT 0,
                    iteration_count         INTEGER NOT NULL DEFAULT 0,
                    assignee_agent_ids      TEXT NOT NULL DEFAULT '[]',
                    depends_on              TEXT NOT NULL DEFAULT '[]',
                    loops_from_operation_id TEXT,
                    escalation_reason       TEXT,
                    blocked_reason          TEXT,
                    created_at              INTEGER NOT NULL,
                    updated_at              INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_operations_work_order ON operations(work_order_id);
                CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status);
                -- At most one open operation per work order. Two racing
                -- writers cannot both assign the same work order: the second
                -- insert fails and its whole transaction rolls back.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_open_order
                    ON operations(work_order_id)
                    WHERE status IN ('TODO','IN_PROGRESS','REVIEW','REWORK');

                CREATE TABLE IF NOT EXISTS agents (
                    id                  TEXT PRIMARY KEY,
                    display_name        TEXT NOT NULL,
                    slug                TEXT NOT NULL,
                    runtime_id          TEXT,
                    kind                TEXT NOT NULL DEFAULT 'WORKER',
                    dispatch_eligible   INTEGER NOT NULL DEFAULT 1,
                    station             TEXT NOT NULL DEFAULT 'build',
                    status              TEXT NOT NULL DEFAULT 'IDLE',
                    role_text           TEXT NOT NULL DEFAULT '',
                    capabilities        TEXT NOT NULL DEFAULT '{}',
                    wip_limit           INTEGER NOT NULL DEFAULT 2,
                    session_key         TEXT,
                    model_hint          TEXT,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS approvals (
                    id              TEXT PRIMARY KEY,
                    work_order_id   TEXT NOT NULL REFERENCES work_orders(id) ON DELETE CASCADE,
                    operation_id    TEXT NOT NULL,
                    approval_type   TEXT NOT NULL,
                    question        TEXT NOT NULL,
                    status          TEXT NOT NULL DEFAULT 'PENDING',
                    resolved_by     TEXT,
                    created_at      INTEGER NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status);

                -- Append-only audit trail. Rows are never updated or deleted.
                CREATE TABLE IF NOT EXISTS activities (
                    id              TEXT PRIMARY KEY,
                    activity_type   TEXT NOT NULL,
                    actor           TEXT NOT NULL,
                    entity_type     TEXT NOT NULL,
                    entity_id       TEXT NOT NULL,
                    summary         TEXT NOT NULL,
                    payload         TEXT NOT NULL DEFAULT '{}',
                    created_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_activities_entity ON activities(entity_type, entity_id);

                CREATE TABLE IF NOT EXISTS sessions (
                    session_key     TEXT PRIMARY KEY,
                    agent_ref       TEXT NOT NULL,
                    label           TEXT NOT NULL DEFAULT '',
                    last_seen_at    INTEGER NOT NULL,
                    created_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent_ref);
                ",
            )
        })
    }
}
