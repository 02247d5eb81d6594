//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! foreman-core domain logic through `EngineState`.

pub mod agent;
pub mod approval;
pub mod dispatch;
pub mod operation;
pub mod order;
pub mod workflow;

use std::sync::Arc;

use foreman_core::session::{HttpNotifier, HttpSessionSpawner};
use foreman_core::EngineState;

/// Initialize a shared `EngineState` from the given SQLite database path
/// and runner base URL.
pub fn init_state(db_path: &str, runner_url: &str) -> EngineState {
    let db = foreman_core::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    });

    let spawner = Arc::new(HttpSessionSpawner::new(runner_url));
    let notifier = Arc::new(HttpNotifier::new(runner_url));

    EngineState::new(db, spawner, notifier)
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
