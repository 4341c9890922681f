use serde::{Deserialize, Serialize};

/// `GET /admin/agents`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct AgentsResponse {
    #[serde(default)]
    pub agents: Vec<String>,
}

impl AgentsResponse {
    /// Agent ids in display order
    pub fn sorted(&self) -> Vec<&str> {
        let mut agents: Vec<&str> = self.agents.iter().map(String::as_str).collect();
        agents.sort_unstable();
        agents
    }
}

/// `GET /admin/policies`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct PolicySummary {
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub total_rules: u64,
}

impl PolicySummary {
    pub fn version_display(&self) -> String {
        match self.version {
            Some(version) => version.to_string(),
            None => "N/A".to_string(),
        }
    }
}
