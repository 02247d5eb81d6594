//! Core error type for the Foreman engine.
//!
//! `CoreError` is used throughout the domain (stores, dispatch, workflow
//! engine). Escalations are not errors: a stage that requires an external
//! approval resolves to `NextAction::Escalate`, never to a variant here.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No eligible agent: {0}")]
    NoEligibleAgent(String),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Stage {index} out of range for workflow '{workflow}'")]
    StageOutOfRange { workflow: String, index: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session spawn failed: {0}")]
    Spawn(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}
