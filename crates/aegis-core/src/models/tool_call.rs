use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a 202 from `POST /tools/{tool}/{action}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    #[serde(default)]
    pub approval_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// What the gateway did with a tool call it accepted.
///
/// Denials (403) and unknown tools (404) never get here; they are
/// classified as client errors by the request layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// The call was allowed and dispatched; carries the adapter result
    Allowed(Value),
    /// The call needs a manual approval before it runs
    PendingApproval(PendingApproval),
}

impl ToolCallOutcome {
    /// Narrow an untyped success body into an outcome
    pub fn from_body(status: u16, body: Value) -> Self {
        let pending = status == 202
            || body.get("status").and_then(Value::as_str) == Some("pending_approval");
        if pending {
            let approval = serde_json::from_value(body).unwrap_or_default();
            ToolCallOutcome::PendingApproval(approval)
        } else {
            ToolCallOutcome::Allowed(body)
        }
    }
}

/// Body of `POST /approve/{approval_id}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRequest {
    pub approved_by: String,
}

/// Response of `POST /approve/{approval_id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub approval_id: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}
