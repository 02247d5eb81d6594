//! Candidate scoring for stage roles and oversight routing.

use tracing::debug;

use crate::models::{Agent, AgentKind, AgentStatus};
use crate::routing::availability::AvailabilitySnapshot;
use crate::routing::classifier::Specialty;
use crate::workflow::StageRole;

/// Any candidate at or below this score is treated as ineligible.
pub const SCORE_CUTOFF: i32 = -900;

/// What a stage role prefers in an agent. Oversight profiles relax the
/// dispatch-eligibility penalty since managers and guards are usually
/// excluded from automated dispatch.
#[derive(Debug, Clone)]
pub struct RoleProfile {
    pub stations: &'static [&'static str],
    pub kinds: &'static [AgentKind],
    pub keywords: &'static [&'static str],
    pub oversight: bool,
}

impl RoleProfile {
    pub fn for_specialty(specialty: Specialty) -> Self {
        let (stations, keywords): (&'static [&'static str], &'static [&'static str]) =
            match specialty {
                Specialty::Plan => (
                    &["plan", "planning", "product"],
                    &["plan", "roadmap", "scope", "spec"],
                ),
                Specialty::Build => (
                    &["build", "dev", "engineering"],
                    &["build", "implement", "code", "develop"],
                ),
                Specialty::Review => (
                    &["review", "qa"],
                    &["review", "qa", "test", "verify"],
                ),
                Specialty::Research => (
                    &["research", "lab"],
                    &["research", "investigate", "analysis"],
                ),
                Specialty::Security => (
                    &["security", "audit"],
                    &["security", "audit", "threat"],
                ),
                Specialty::Ops => (
                    &["ops", "infra", "deploy"],
                    &["deploy", "release", "infra", "ops"],
                ),
                Specialty::Ui => (
                    &["ui", "design", "frontend"],
                    &["ui", "ux", "design", "frontend"],
                ),
            };
        Self {
            stations,
            kinds: &[AgentKind::Worker],
            keywords,
            oversight: false,
        }
    }

    pub fn for_role(role: &StageRole) -> Self {
        match role {
            StageRole::Specialty(specialty) => Self::for_specialty(*specialty),
            StageRole::Manager => Self {
                stations: &["management", "executive"],
                kinds: &[AgentKind::Manager],
                keywords: &["manage", "coordinate", "delegate"],
                oversight: true,
            },
            StageRole::Ceo => Self {
                stations: &["executive"],
                kinds: &[AgentKind::Ceo],
                keywords: &["executive", "approve", "decide"],
                oversight: true,
            },
            StageRole::Guard => Self {
                stations: &["security", "audit"],
                kinds: &[AgentKind::Guard],
                keywords: &["guard", "security", "veto", "audit"],
                oversight: true,
            },
        }
    }
}

/// Score one agent against a role profile given current availability.
pub fn score_agent(agent: &Agent, profile: &RoleProfile, snapshot: &AvailabilitySnapshot) -> i32 {
    if matches!(agent.status, AgentStatus::Blocked | AgentStatus::Error) {
        return -1000;
    }

    let avail = snapshot.get(&agent.id);
    let mut score = 0i32;

    if profile
        .stations
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&agent.station))
    {
        score += 120;
    }
    if profile.kinds.contains(&agent.kind) {
        score += 40;
    }
    if profile.keywords.iter().any(|k| agent.has_capability(k)) {
        score += 50;
    }
    let role_text = agent.role_text.to_lowercase();
    if profile.keywords.iter().any(|k| role_text.contains(k)) {
        score += 20;
    }
    if !agent.dispatch_eligible && !profile.oversight {
        score -= 120;
    }

    if avail.load >= agent.wip_limit {
        score -= 200;
    } else {
        let headroom = (agent.wip_limit - avail.load).min(3) as i32;
        score += 5 * headroom;
    }
    if avail.has_active_session {
        score -= 5;
    }

    score
}

/// Pick the best-scoring agent for a role, or `None` if every candidate
/// falls at or below the cutoff. Ties break toward lower load, then
/// lexicographic display name.
pub fn select_agent<'a>(
    agents: &'a [Agent],
    profile: &RoleProfile,
    snapshot: &AvailabilitySnapshot,
) -> Option<&'a Agent> {
    let mut best: Option<(&Agent, i32)> = None;
    for agent in agents {
        let score = score_agent(agent, profile, snapshot);
        debug!(agent_id = %agent.id, score, "scored candidate");
        if score <= SCORE_CUTOFF {
            continue;
        }
        best = match best {
            None => Some((agent, score)),
            Some((current, top)) => {
                if score > top || (score == top && prefer(agent, current, snapshot)) {
                    Some((agent, score))
                } else {
                    Some((current, top))
                }
            }
        };
    }
    best.map(|(agent, _)| agent)
}

fn prefer(challenger: &Agent, incumbent: &Agent, snapshot: &AvailabilitySnapshot) -> bool {
    let c_load = snapshot.get(&challenger.id).load;
    let i_load = snapshot.get(&incumbent.id).load;
    c_load < i_load || (c_load == i_load && challenger.display_name < incumbent.display_name)
}

/// Resolve the oversight agent for escalations and completion notices.
/// Only agents holding an external session key qualify.
pub fn select_oversight(agents: &[Agent]) -> Option<&Agent> {
    let mut best: Option<(&Agent, i32)> = None;
    for agent in agents {
        if agent.session_key.as_deref().map_or(true, str::is_empty) {
            continue;
        }
        if matches!(agent.status, AgentStatus::Blocked | AgentStatus::Error) {
            continue;
        }
        let mut score = 0i32;
        if agent.kind == AgentKind::Ceo {
            score += 200;
        }
        let station = agent.station.to_lowercase();
        if station == "executive" {
            score += 80;
        } else if station == "management" {
            score += 30;
        }
        if agent.has_capability("delegation") {
            score += 25;
        }
        if agent.has_capability("messaging") {
            score += 25;
        }
        if agent.slug == "ceo" {
            score += 10;
        }
        best = match best {
            Some((current, top)) if top >= score => Some((current, top)),
            _ => Some((agent, score)),
        };
    }
    best.map(|(agent, _)| agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn worker(id: &str, name: &str, station: &str, wip: u32) -> Agent {
        Agent::new(
            id.into(),
            name.into(),
            name.to_lowercase().replace(' ', "-"),
            AgentKind::Worker,
            station.into(),
            wip,
        )
    }

    fn empty_snapshot(agents: &[Agent]) -> AvailabilitySnapshot {
        AvailabilitySnapshot::compute(agents, &[], &[], Utc::now())
    }

    #[test]
    fn test_station_and_kind_weights() {
        let a = worker("a1", "Build Bot", "build", 2);
        let snap = empty_snapshot(std::slice::from_ref(&a));
        let profile = RoleProfile::for_specialty(Specialty::Build);
        // 120 station + 40 kind + 5 * headroom(2)
        assert_eq!(score_agent(&a, &profile, &snap), 170);
    }

    #[test]
    fn test_overloaded_agent_penalized() {
        let a = worker("a1", "Busy Bot", "build", 1);
        let mut snap = empty_snapshot(std::slice::from_ref(&a));
        snap.note_assignment("a1");
        let profile = RoleProfile::for_specialty(Specialty::Build);
        // 120 + 40 - 200 over cap
        assert_eq!(score_agent(&a, &profile, &snap), -40);
    }

    #[test]
    fn test_errored_agent_excluded() {
        let mut a = worker("a1", "Error Bot", "build", 2);
        a.status = AgentStatus::Error;
        let snap = empty_snapshot(std::slice::from_ref(&a));
        let profile = RoleProfile::for_specialty(Specialty::Build);
        assert_eq!(score_agent(&a, &profile, &snap), -1000);
        assert!(select_agent(&[a], &profile, &snap).is_none());
    }

    #[test]
    fn test_tie_breaks_on_load_then_name() {
        let alice = worker("a1", "Alice", "build", 3);
        let bob = worker("a2", "Bob", "build", 3);
        let agents = vec![bob.clone(), alice.clone()];
        let profile = RoleProfile::for_specialty(Specialty::Build);

        let snap = empty_snapshot(&agents);
        let picked = select_agent(&agents, &profile, &snap).unwrap();
        assert_eq!(picked.id, "a1");

        // Loading Alice flips the tie-break to Bob before names matter.
        let mut snap = empty_snapshot(&agents);
        snap.note_assignment("a1");
        let picked = select_agent(&agents, &profile, &snap).unwrap();
        assert_eq!(picked.id, "a2");
    }

    #[test]
    fn test_oversight_allows_non_dispatch_eligible() {
        let mut guard = Agent::new(
            "g1".into(),
            "Gatekeeper".into(),
            "gatekeeper".into(),
            AgentKind::Guard,
            "security".into(),
            1,
        );
        guard.dispatch_eligible = false;
        let snap = empty_snapshot(std::slice::from_ref(&guard));
        let profile = RoleProfile::for_role(&StageRole::Guard);
        // 120 station + 40 kind + 5 headroom, no eligibility penalty
        assert_eq!(score_agent(&guard, &profile, &snap), 165);

        let worker_profile = RoleProfile::for_specialty(Specialty::Security);
        // Same agent scored for a worker specialty takes the -120 hit.
        assert_eq!(score_agent(&guard, &worker_profile, &snap), 5);
    }

    #[test]
    fn test_oversight_requires_session_key() {
        let mut ceo = Agent::new(
            "c1".into(),
            "Chief".into(),
            "ceo".into(),
            AgentKind::Ceo,
            "executive".into(),
            1,
        );
        assert!(select_oversight(std::slice::from_ref(&ceo)).is_none());

        ceo.session_key = Some("sess-ceo".into());
        let picked = select_oversight(std::slice::from_ref(&ceo)).unwrap();
        assert_eq!(picked.id, "c1");
    }

    #[test]
    fn test_oversight_prefers_ceo_over_manager() {
        let mut manager = Agent::new(
            "m1".into(),
            "Manager".into(),
            "manager".into(),
            AgentKind::Manager,
            "management".into(),
            1,
        );
        manager.session_key = Some("sess-m".into());
        manager.capabilities.insert("delegation".into(), true);
        manager.capabilities.insert("messaging".into(), true);

        let mut ceo = Agent::new(
            "c1".into(),
            "Chief".into(),
            "ceo".into(),
            AgentKind::Ceo,
            "executive".into(),
            1,
        );
        ceo.session_key = Some("sess-c".into());

        // Manager: 30 + 25 + 25 = 80. Ceo: 200 + 80 + 10 = 290.
        let agents = [manager, ceo];
        let picked = select_oversight(&agents).unwrap();
        assert_eq!(picked.id, "c1");
    }
}
