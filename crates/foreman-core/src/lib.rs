//! Foreman Core — orchestration engine for multi-agent work delivery.
//!
//! This crate contains the domain logic: data models, SQLite-backed stores,
//! the specialty classifier and agent scorer, the automated dispatch loop,
//! and the per-operation workflow state machine with its coordinating
//! service. It has no HTTP framework dependency; the runner's session API
//! is reached through the [`session::SessionSpawner`] and
//! [`session::Notifier`] traits, making the engine embeddable in servers,
//! CLIs and tests alike.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod models;
pub mod routing;
pub mod session;
pub mod state;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use db::Database;
pub use error::CoreError;
pub use state::{EngineState, EngineStateInner};
