//! Command handlers. Each one is a thin view over a session transition or
//! a single gateway call.

use std::io::{self, Write};
use std::sync::Arc;

use aegis_core::models::{Decision, DecisionFilter, DecisionKind, ToolCallOutcome};
use aegis_core::{ApiClient, ApiError, Config, SessionManager, TypedResponse};
use anyhow::{anyhow, bail, Context, Result};

use crate::{follow, Command};

/// Environment variable read instead of prompting for a password
const PASSWORD_ENV: &str = "AEGIS_PASSWORD";

/// Decisions fetched when filtering client-side
const FILTER_FETCH_LIMIT: u32 = 100;

/// How requests are authenticated for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Bearer token from the stored login session
    Session,
    /// Fixed API key from `--api-key` / `AEGIS_API_KEY`
    ApiKey,
}

pub async fn run(
    command: Command,
    auth: AuthMode,
    config: &mut Config,
    session: &Arc<SessionManager>,
    api: &ApiClient,
) -> Result<()> {
    match command {
        Command::Login { username } => login(config, session, username).await,
        Command::Logout => {
            session.logout();
            println!("👋 Logged out");
            Ok(())
        }
        Command::Status => status(auth, session, api).await,
        Command::Agents => agents(api).await,
        Command::Policies => policies(api).await,
        Command::Decisions {
            limit,
            agent,
            decision,
            follow,
            interval,
        } => {
            let filter = DecisionFilter {
                agent,
                decision,
                limit: Some(limit as usize),
            };
            if follow {
                follow::follow_decisions(api, &filter, interval).await
            } else {
                decisions(api, &filter).await
            }
        }
        Command::Call {
            agent_id,
            tool,
            action,
            params,
            parent,
        } => call(api, &agent_id, &tool, &action, params.as_deref(), parent.as_deref()).await,
        Command::Approve {
            approval_id,
            approved_by,
        } => approve(api, &approval_id, &approved_by).await,
    }
}

/// Unwrap a response's payload or turn its reason into a command error
pub fn expect_data<T>(response: TypedResponse<T>) -> Result<T> {
    response.into_result().map_err(describe_failure)
}

pub fn describe_failure(err: ApiError) -> anyhow::Error {
    match err {
        ApiError::AuthenticationRequired => {
            anyhow!("🔒 {} Run `aegis login` or check your API key.", err)
        }
        _ if err.status() == 0 => anyhow!("❌ {}", err),
        _ => anyhow!("❌ {} (status {})", err, err.status()),
    }
}

async fn login(
    config: &mut Config,
    session: &SessionManager,
    username: Option<String>,
) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) => name,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?,
    };

    if let Err(e) = session.login(&username, &password).await {
        bail!("❌ {}", e);
    }

    config.last_username = Some(username.clone());
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to remember username");
    }
    println!(
        "✅ Logged in as {} (session expires in {} minutes)",
        username,
        session.expires_in().num_minutes()
    );
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("A username is required");
    }
    Ok(value)
}

async fn status(auth: AuthMode, session: &SessionManager, api: &ApiClient) -> Result<()> {
    let snapshot = session.snapshot();
    let authorized = auth == AuthMode::ApiKey || snapshot.is_authenticated;
    match snapshot.expires_at {
        _ if auth == AuthMode::ApiKey => println!("🔑 Using API key"),
        Some(expires_at) if snapshot.is_authenticated => println!(
            "🔐 Signed in, session expires at {} ({} minutes left)",
            expires_at.with_timezone(&chrono::Local).format("%H:%M:%S"),
            session.expires_in().num_minutes()
        ),
        _ => println!("🔓 Not signed in"),
    }

    let (health, summary) = futures::join!(api.health(), async {
        if authorized {
            Some(api.fetch_policy_summary().await)
        } else {
            None
        }
    });

    match health.data() {
        Some(_) => println!("🟢 Gateway {} is healthy", api.base_url()),
        None => println!(
            "🔴 Gateway {}: {}",
            api.base_url(),
            health.reason().unwrap_or_default()
        ),
    }
    if let Some(summary) = summary.and_then(TypedResponse::into_data) {
        println!(
            "📊 Policy version {} - {} agents, {} rules",
            summary.version_display(),
            summary.agents.len(),
            summary.total_rules
        );
    }
    Ok(())
}

async fn agents(api: &ApiClient) -> Result<()> {
    let agents = expect_data(api.fetch_agents().await)?;
    if agents.agents.is_empty() {
        println!("No agents found");
        return Ok(());
    }
    println!("🤖 Found {} agents:", agents.agents.len());
    for agent in agents.sorted() {
        println!("   • {}", agent);
    }
    Ok(())
}

async fn policies(api: &ApiClient) -> Result<()> {
    let summary = expect_data(api.fetch_policy_summary().await)?;
    println!("📊 Policy Summary:");
    println!("   Version: {}", summary.version_display());
    println!("   Files: {}", summary.files.len());
    println!("   Agents: {}", summary.agents.len());
    println!("   Total Rules: {}", summary.total_rules);

    let mut files = summary.files.clone();
    files.sort();
    if !files.is_empty() {
        println!("\n📁 Policy Files:");
        for file in files {
            println!("   • {}", file);
        }
    }

    let mut agents = summary.agents;
    agents.sort();
    if !agents.is_empty() {
        println!("\n🤖 Agents:");
        for agent in agents {
            println!("   • {}", agent);
        }
    }
    Ok(())
}

async fn decisions(api: &ApiClient, filter: &DecisionFilter) -> Result<()> {
    let filtering = filter.agent.is_some() || filter.decision.is_some();
    let fetch_limit = if filtering {
        FILTER_FETCH_LIMIT
    } else {
        filter.limit.unwrap_or(10) as u32
    };

    let response = expect_data(api.fetch_recent_decisions(fetch_limit).await)?;
    let shown = filter.apply(&response.decisions);
    if shown.is_empty() {
        println!("No matching decisions found");
        return Ok(());
    }

    if filtering {
        println!("🔍 Found {} matching decisions:", shown.len());
    } else {
        println!("📋 Last {} decisions:", shown.len());
    }
    for decision in shown {
        print_decision(decision);
    }
    Ok(())
}

pub fn print_decision(decision: &Decision) {
    println!(
        "{} [{}] {} → {}/{} ({})",
        decision.decision.icon(),
        decision.time_display(),
        if decision.agent_id.is_empty() { "Unknown" } else { decision.agent_id.as_str() },
        decision.tool,
        decision.action,
        decision.decision
    );
    if decision.decision != DecisionKind::Allow {
        println!("    💬 {}", decision.reason_display());
    }
}

async fn call(
    api: &ApiClient,
    agent_id: &str,
    tool: &str,
    action: &str,
    params: Option<&str>,
    parent: Option<&str>,
) -> Result<()> {
    println!("🧪 Testing call: {} → {}/{}", agent_id, tool, action);
    if let Some(parent) = parent {
        println!("   Parent: {}", parent);
    }

    let response = api.test_tool_call(agent_id, tool, action, params, parent).await;
    match response.into_result() {
        Ok(ToolCallOutcome::Allowed(result)) => {
            println!("✅ ALLOWED");
            println!("Response: {}", serde_json::to_string_pretty(&result)?);
        }
        Ok(ToolCallOutcome::PendingApproval(pending)) => {
            println!("⏳ PENDING APPROVAL");
            println!(
                "Approval ID: {}",
                pending.approval_id.as_deref().unwrap_or("Unknown")
            );
            println!("Reason: {}", pending.reason.as_deref().unwrap_or("Unknown"));
        }
        Err(err) if err.status() == 403 => {
            println!("🚫 DENIED");
            println!("Reason: {}", err);
        }
        Err(err) => return Err(describe_failure(err)),
    }
    Ok(())
}

async fn approve(api: &ApiClient, approval_id: &str, approved_by: &str) -> Result<()> {
    let approval = expect_data(api.approve_action(approval_id, approved_by).await)?;
    println!(
        "✅ Approved {} ({})",
        approval.approval_id.as_deref().unwrap_or(approval_id),
        approval.status.as_deref().unwrap_or("approved")
    );
    if let Some(result) = approval.result {
        println!("Result: {}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}
