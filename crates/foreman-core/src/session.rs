//! Execution session spawning and oversight messaging.
//!
//! Both interfaces are opaque, possibly slow, possibly failing RPCs to the
//! external runner. The engine treats them as best-effort: failures after a
//! committed transition block the affected operation instead of unwinding
//! the transition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Result of a successful spawn call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedSession {
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Request body for a spawn call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub agent_ref: String,
    pub label: String,
    pub task: String,
    pub context: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
}

/// Spawns an execution session for an agent.
#[async_trait]
pub trait SessionSpawner: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedSession, CoreError>;
}

/// Delivers a message to an oversight session. Best-effort only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, session_key: &str, message: &str) -> Result<(), CoreError>;
}

/// Spawner backed by the runner's HTTP API.
pub struct HttpSessionSpawner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionSpawner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SessionSpawner for HttpSessionSpawner {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedSession, CoreError> {
        let url = format!("{}/sessions", self.base_url.trim_end_matches('/'));
        debug!(agent_ref = %request.agent_ref, label = %request.label, "spawning session");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::Spawn(format!("spawn request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::Spawn(format!(
                "runner returned {} for {}",
                response.status(),
                request.agent_ref
            )));
        }

        response
            .json::<SpawnedSession>()
            .await
            .map_err(|e| CoreError::Spawn(format!("invalid spawn response: {}", e)))
    }
}

/// Notifier backed by the runner's HTTP messaging endpoint.
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, session_key: &str, message: &str) -> Result<(), CoreError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "sessionKey": session_key,
            "message": message,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Spawn(format!("notify request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::Spawn(format!(
                "runner returned {} for session {}",
                response.status(),
                session_key
            )));
        }
        Ok(())
    }
}
