use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded for one gateway tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum DecisionKind {
    Allow,
    Deny,
    PendingApproval,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DecisionKind {
    pub fn icon(&self) -> &'static str {
        match self {
            DecisionKind::Allow => "✅",
            DecisionKind::Deny => "🚫",
            DecisionKind::PendingApproval => "⏳",
            DecisionKind::Unknown => "❓",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Allow => write!(f, "allow"),
            DecisionKind::Deny => write!(f, "deny"),
            DecisionKind::PendingApproval => write!(f, "pending_approval"),
            DecisionKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(DecisionKind::Allow),
            "deny" => Ok(DecisionKind::Deny),
            "pending_approval" => Ok(DecisionKind::PendingApproval),
            other => Err(format!("unknown decision type: {}", other)),
        }
    }
}

/// One entry of `GET /admin/decisions`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Decision {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub parent_agent: Option<String>,
    #[serde(default)]
    pub call_chain: Vec<String>,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params_hash: String,
    #[serde(default)]
    pub decision: DecisionKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub policy_version: Option<i64>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub approval_id: Option<String>,
}

impl Decision {
    /// Identity used to avoid showing the same decision twice while polling
    pub fn dedup_key(&self) -> String {
        format!(
            "{}-{}-{}-{}/{}-{}",
            self.timestamp, self.agent_id, self.decision, self.tool, self.action, self.params_hash
        )
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// `HH:MM:SS` when the timestamp parses, the raw value otherwise
    pub fn time_display(&self) -> String {
        match self.parsed_timestamp() {
            Some(dt) => dt.format("%H:%M:%S").to_string(),
            None if self.timestamp.is_empty() => "Unknown".to_string(),
            None => self.timestamp.clone(),
        }
    }

    pub fn reason_display(&self) -> &str {
        self.reason.as_deref().unwrap_or("No reason")
    }
}

/// `GET /admin/decisions` wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct DecisionsResponse {
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

/// Client-side filter over a fetched decision list.
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub agent: Option<String>,
    pub decision: Option<DecisionKind>,
    pub limit: Option<usize>,
}

impl DecisionFilter {
    pub fn matches(&self, decision: &Decision) -> bool {
        let agent_ok = self
            .agent
            .as_ref()
            .map(|agent| decision.agent_id.eq_ignore_ascii_case(agent))
            .unwrap_or(true);
        let kind_ok = self.decision.map(|kind| decision.decision == kind).unwrap_or(true);
        agent_ok && kind_ok
    }

    pub fn apply<'a>(&self, decisions: &'a [Decision]) -> Vec<&'a Decision> {
        let limit = self.limit.unwrap_or(usize::MAX);
        decisions.iter().filter(|d| self.matches(d)).take(limit).collect()
    }
}
