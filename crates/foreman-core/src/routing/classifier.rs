//! Specialty classifier — maps a work order's text and metadata to a
//! coarse routing tag.
//!
//! Resolution order:
//!   1. Exact lookup of the routing template (or workflow id) in the
//!      template table.
//!   2. Keyword scoring over the tokenized title + goal + template text.
//!   3. Ties or a zero score default to `build`.

use serde::{Deserialize, Serialize};

use crate::models::WorkOrder;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Plan,
    Build,
    Review,
    Research,
    Security,
    Ops,
    Ui,
}

impl Specialty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Build => "build",
            Self::Review => "review",
            Self::Research => "research",
            Self::Security => "security",
            Self::Ops => "ops",
            Self::Ui => "ui",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(Self::Plan),
            "build" => Some(Self::Build),
            "review" => Some(Self::Review),
            "research" => Some(Self::Research),
            "security" => Some(Self::Security),
            "ops" => Some(Self::Ops),
            "ui" => Some(Self::Ui),
            _ => None,
        }
    }

    pub fn all() -> [Specialty; 7] {
        [
            Self::Plan,
            Self::Build,
            Self::Review,
            Self::Research,
            Self::Security,
            Self::Ops,
            Self::Ui,
        ]
    }
}

/// Exact template/workflow-id routing table. Checked before any keyword
/// scoring happens.
const TEMPLATE_TABLE: &[(&str, Specialty)] = &[
    ("bug_fix", Specialty::Build),
    ("hotfix", Specialty::Build),
    ("feature_delivery", Specialty::Plan),
    ("roadmap", Specialty::Plan),
    ("code_review", Specialty::Review),
    ("research_spike", Specialty::Research),
    ("security_audit", Specialty::Security),
    ("incident", Specialty::Ops),
    ("ops_incident", Specialty::Ops),
    ("ui_revamp", Specialty::Ui),
    ("design_polish", Specialty::Ui),
];

/// Keyword table scored against the tokenized work-order text.
const KEYWORD_TABLE: &[(Specialty, &[&str])] = &[
    (
        Specialty::Plan,
        &["plan", "planning", "roadmap", "spec", "scope", "estimate", "milestone"],
    ),
    (
        Specialty::Build,
        &["build", "implement", "fix", "bug", "code", "feature", "refactor", "develop"],
    ),
    (
        Specialty::Review,
        &["review", "verify", "qa", "test", "regression", "approve"],
    ),
    (
        Specialty::Research,
        &["research", "investigate", "spike", "explore", "analysis", "prototype"],
    ),
    (
        Specialty::Security,
        &["security", "audit", "vulnerability", "exploit", "threat", "cve", "pentest"],
    ),
    (
        Specialty::Ops,
        &["deploy", "deployment", "release", "infra", "incident", "outage", "rollback", "ops"],
    ),
    (
        Specialty::Ui,
        &["ui", "ux", "design", "frontend", "layout", "css", "styling"],
    ),
];

/// Classify a work order into a specialty routing tag.
pub fn classify(order: &WorkOrder) -> Specialty {
    // 1. Exact template / workflow-id lookup.
    for key in [order.routing_template.as_deref(), order.workflow_id.as_deref()]
        .into_iter()
        .flatten()
    {
        if let Some((_, specialty)) = TEMPLATE_TABLE.iter().find(|(t, _)| *t == key) {
            return *specialty;
        }
    }

    // 2. Keyword scoring over title + goal + template text.
    let text = format!(
        "{} {} {}",
        order.title,
        order.goal,
        order.routing_template.as_deref().unwrap_or("")
    );
    let tokens = tokenize(&text);

    let mut best: Option<(Specialty, usize)> = None;
    let mut tied = false;
    for (specialty, keywords) in KEYWORD_TABLE {
        let score = tokens
            .iter()
            .filter(|t| keywords.contains(&t.as_str()))
            .count();
        match best {
            Some((_, top)) if score > top => {
                best = Some((*specialty, score));
                tied = false;
            }
            Some((_, top)) if score == top => tied = true,
            None => best = Some((*specialty, score)),
            _ => {}
        }
    }

    // 3. Default on tie or zero score.
    match best {
        Some((specialty, score)) if score > 0 && !tied => specialty,
        _ => Specialty::Build,
    }
}

fn tokenize(text: &str) -> Vec<String> {
    static TOKEN_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = TOKEN_RE
        .get_or_init(|| regex::Regex::new(r"[a-z0-9_]+").expect("static token pattern"));
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn order(title: &str, goal: &str, template: Option<&str>) -> WorkOrder {
        WorkOrder::new(
            "wo-1".into(),
            "WO-1".into(),
            title.into(),
            goal.into(),
            Priority::Normal,
            template.map(String::from),
            None,
        )
    }

    #[test]
    fn test_template_lookup_wins() {
        // Title screams security, but the template table is exact.
        let o = order("security audit of everything", "threat threat threat", Some("bug_fix"));
        assert_eq!(classify(&o), Specialty::Build);
    }

    #[test]
    fn test_keyword_scoring() {
        let o = order(
            "Harden login endpoint",
            "run a security audit and fix the vulnerability reported in the pentest",
            None,
        );
        assert_eq!(classify(&o), Specialty::Security);
    }

    #[test]
    fn test_zero_score_defaults_to_build() {
        let o = order("Do the thing", "it needs doing", None);
        assert_eq!(classify(&o), Specialty::Build);
    }

    #[test]
    fn test_tie_defaults_to_build() {
        // One plan keyword, one ops keyword.
        let o = order("roadmap for the release", "", None);
        assert_eq!(classify(&o), Specialty::Build);
    }

    #[test]
    fn test_workflow_id_lookup() {
        let mut o = order("untitled", "", None);
        o.workflow_id = Some("security_audit".into());
        assert_eq!(classify(&o), Specialty::Security);
    }
}
