//! Agent availability resolver.
//!
//! Computes a point-in-time snapshot of every agent's open-operation load
//! and active-session flag. Agent references drift across subsystems
//! (ids, display names, slugs, runtime ids, session keys), so all lookups
//! go through one [`AgentIndex`] built from normalized identity tokens.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::models::{Agent, AgentKind, AgentStatus, Operation, SessionRecord};

/// Sessions older than this no longer count toward availability.
pub const SESSION_FRESHNESS_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct AgentAvailability {
    pub load: u32,
    pub has_active_session: bool,
}

/// Multi-key identity index: every known token of every agent maps to its
/// canonical id, so a single resolution call tolerates naming drift.
pub struct AgentIndex {
    tokens: HashMap<String, String>,
}

impl AgentIndex {
    pub fn build(agents: &[Agent]) -> Self {
        let mut tokens = HashMap::new();
        for agent in agents {
            let refs = [
                Some(agent.id.as_str()),
                Some(agent.display_name.as_str()),
                Some(agent.slug.as_str()),
                agent.runtime_id.as_deref(),
                agent.session_key.as_deref(),
            ];
            for token in refs.into_iter().flatten() {
                let normalized = normalize(token);
                if !normalized.is_empty() {
                    tokens.entry(normalized).or_insert_with(|| agent.id.clone());
                }
            }
        }
        Self { tokens }
    }

    /// Resolve any known reference to the canonical agent id.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        self.tokens.get(&normalize(reference)).map(String::as_str)
    }
}

/// Lowercase and collapse non-alphanumeric runs to single dashes, so
/// "Build Bot #1", "build-bot-1" and "BUILD_BOT_1" all match.
fn normalize(reference: &str) -> String {
    let mut out = String::with_capacity(reference.len());
    let mut last_dash = true;
    for c in reference.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Per-batch availability snapshot, plus simulated-load bookkeeping for
/// assignments made during the batch.
pub struct AvailabilitySnapshot {
    per_agent: HashMap<String, AgentAvailability>,
}

impl AvailabilitySnapshot {
    /// Compute one snapshot from current agents, open operations and live
    /// sessions. An agent with a fresh session floors at load 1 even
    /// before its operation row lands.
    pub fn compute(
        agents: &[Agent],
        open_operations: &[Operation],
        sessions: &[SessionRecord],
        now: DateTime<Utc>,
    ) -> Self {
        let index = AgentIndex::build(agents);
        let mut per_agent: HashMap<String, AgentAvailability> = agents
            .iter()
            .map(|a| (a.id.clone(), AgentAvailability::default()))
            .collect();

        for op in open_operations {
            for assignee in &op.assignee_agent_ids {
                if let Some(agent_id) = index.resolve(assignee) {
                    if let Some(entry) = per_agent.get_mut(agent_id) {
                        entry.load += 1;
                    }
                }
            }
        }

        let freshness = Duration::minutes(SESSION_FRESHNESS_MINUTES);
        for session in sessions {
            if now.signed_duration_since(session.last_seen_at) > freshness {
                continue;
            }
            let resolved = index
                .resolve(&session.agent_ref)
                .or_else(|| index.resolve(&session.session_key));
            if let Some(agent_id) = resolved {
                if let Some(entry) = per_agent.get_mut(agent_id) {
                    entry.has_active_session = true;
                    if entry.load == 0 {
                        entry.load = 1;
                    }
                }
            }
        }

        Self { per_agent }
    }

    pub fn get(&self, agent_id: &str) -> AgentAvailability {
        self.per_agent.get(agent_id).copied().unwrap_or_default()
    }

    /// Availability predicate for automated dispatch.
    pub fn is_available(&self, agent: &Agent) -> bool {
        agent.kind == AgentKind::Worker
            && agent.dispatch_eligible
            && !matches!(agent.status, AgentStatus::Blocked | AgentStatus::Error)
            && self.get(&agent.id).load < agent.wip_limit
    }

    /// Record a simulated assignment so later picks in the same batch see
    /// the increased load.
    pub fn note_assignment(&mut self, agent_id: &str) {
        self.per_agent.entry(agent_id.to_string()).or_default().load += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationStatus;

    fn agent(id: &str, name: &str, wip: u32) -> Agent {
        let mut a = Agent::new(
            id.into(),
            name.into(),
            name.to_lowercase().replace(' ', "-"),
            AgentKind::Worker,
            "build".into(),
            wip,
        );
        a.runtime_id = Some(format!("rt-{}", id));
        a
    }

    fn open_op(id: &str, assignee: &str) -> Operation {
        let mut op = Operation::new(
            id.into(),
            "wo-1".into(),
            "build".into(),
            "Build".into(),
            "bug_fix".into(),
            0,
            vec![assignee.into()],
        );
        op.status = OperationStatus::InProgress;
        op
    }

    #[test]
    fn test_load_counts_drifted_references() {
        let agents = vec![agent("a1", "Build Bot", 3)];
        // Three naming styles for the same agent.
        let ops = vec![
            open_op("o1", "a1"),
            open_op("o2", "Build Bot"),
            open_op("o3", "BUILD_BOT"),
        ];
        let snap = AvailabilitySnapshot::compute(&agents, &ops, &[], Utc::now());
        assert_eq!(snap.get("a1").load, 3);
    }

    #[test]
    fn test_fresh_session_floors_load() {
        let agents = vec![agent("a1", "Build Bot", 3)];
        let session = SessionRecord::new("sess-1".into(), "rt-a1".into(), "spawn".into());
        let snap = AvailabilitySnapshot::compute(&agents, &[], &[session], Utc::now());
        let avail = snap.get("a1");
        assert!(avail.has_active_session);
        assert_eq!(avail.load, 1);
    }

    #[test]
    fn test_stale_session_ignored() {
        let agents = vec![agent("a1", "Build Bot", 3)];
        let mut session = SessionRecord::new("sess-1".into(), "a1".into(), "spawn".into());
        session.last_seen_at = Utc::now() - Duration::minutes(SESSION_FRESHNESS_MINUTES + 1);
        let snap = AvailabilitySnapshot::compute(&agents, &[], &[session], Utc::now());
        assert!(!snap.get("a1").has_active_session);
        assert_eq!(snap.get("a1").load, 0);
    }

    #[test]
    fn test_session_does_not_double_count() {
        let agents = vec![agent("a1", "Build Bot", 3)];
        let ops = vec![open_op("o1", "a1"), open_op("o2", "a1")];
        let session = SessionRecord::new("sess-1".into(), "a1".into(), "spawn".into());
        let snap = AvailabilitySnapshot::compute(&agents, &ops, &[session], Utc::now());
        // Floor only applies when no operation rows exist yet.
        assert_eq!(snap.get("a1").load, 2);
    }

    #[test]
    fn test_availability_predicate() {
        let mut at_cap = agent("a1", "Busy Bot", 1);
        let free = agent("a2", "Free Bot", 2);
        let mut errored = agent("a3", "Error Bot", 2);
        errored.status = AgentStatus::Error;
        at_cap.wip_limit = 1;

        let ops = vec![open_op("o1", "a1")];
        let snap = AvailabilitySnapshot::compute(
            &[at_cap.clone(), free.clone(), errored.clone()],
            &ops,
            &[],
            Utc::now(),
        );
        assert!(!snap.is_available(&at_cap));
        assert!(snap.is_available(&free));
        assert!(!snap.is_available(&errored));
    }

    #[test]
    fn test_note_assignment_caps_within_batch() {
        let a = agent("a1", "Build Bot", 1);
        let mut snap = AvailabilitySnapshot::compute(&[a.clone()], &[], &[], Utc::now());
        assert!(snap.is_available(&a));
        snap.note_assignment("a1");
        assert!(!snap.is_available(&a));
    }
}
