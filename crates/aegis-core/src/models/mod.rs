//! Payload shapes returned by the Aegis gateway.
//!
//! This module contains the typed views the dashboard narrows raw JSON into:
//!
//! - `AgentsResponse`, `PolicySummary`: loaded policy documents
//! - `Decision`, `DecisionKind`: the policy decision log
//! - `ToolCallOutcome`, `PendingApproval`, `ApprovalResponse`: gateway tool calls
//!
//! Every optional server field is `#[serde(default)]`; nothing is assumed present.

pub mod decision;
pub mod policy;
pub mod tool_call;

pub use decision::{Decision, DecisionFilter, DecisionKind, DecisionsResponse};
pub use policy::{AgentsResponse, PolicySummary};
pub use tool_call::{ApprovalRequest, ApprovalResponse, PendingApproval, ToolCallOutcome};
