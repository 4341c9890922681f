//! Aegis - a terminal dashboard for the Aegis policy gateway.
//!
//! Signs in against the gateway, keeps the session between runs, and shows
//! agents, policies and the decision log. Tool calls can be tested and
//! pending approvals granted from here as well.

mod commands;
mod follow;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aegis_core::models::DecisionKind;
use aegis_core::{ApiClient, Config, SessionManager};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::AuthMode;

/// Log file name prefix when logging to a directory
const LOG_FILE_PREFIX: &str = "aegis.log";

#[derive(Parser)]
#[command(name = "aegis", version, about = "Policy management and decision monitoring for the Aegis gateway")]
struct Cli {
    /// Gateway base URL (overrides config and AEGIS_API_BASE)
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Gateway API key sent as the bearer token instead of a login session
    #[arg(long, global = true, env = "AEGIS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Write logs to a daily-rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show session state and gateway health
    Status,
    /// List all agents
    Agents,
    /// Show the loaded policy summary
    Policies,
    /// Show recent policy decisions
    Decisions {
        /// Number of decisions to show
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
        /// Only decisions made for this agent
        #[arg(long)]
        agent: Option<String>,
        /// Only decisions of this type (allow, deny, pending_approval)
        #[arg(long)]
        decision: Option<DecisionKind>,
        /// Keep polling for new decisions
        #[arg(short, long)]
        follow: bool,
        /// Seconds between polls when following
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Send a test tool call through the gateway
    Call {
        agent_id: String,
        tool: String,
        action: String,
        /// JSON parameters for the tool call
        #[arg(long)]
        params: Option<String>,
        /// Parent agent ID (for call chain testing)
        #[arg(long)]
        parent: Option<String>,
    },
    /// Approve a pending action
    Approve {
        approval_id: String,
        /// Name recorded as the approver
        #[arg(long = "by", default_value = "admin")]
        approved_by: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let mut config = Config::load()?;
    if let Some(base) = cli.api_base {
        config.api_base_url = base;
    }
    info!(api_base = %config.base_url(), "Aegis starting");

    let session = Arc::new(SessionManager::from_config(&config)?);
    session.restore();
    let (api, auth) = match cli.api_key.filter(|key| !key.is_empty()) {
        Some(key) => {
            info!("Authenticating with API key");
            (ApiClient::with_api_key(config.base_url(), &key)?, AuthMode::ApiKey)
        }
        None => (ApiClient::for_session(&session, &config), AuthMode::Session),
    };

    commands::run(cli.command, auth, &mut config, &session, &api).await
}
