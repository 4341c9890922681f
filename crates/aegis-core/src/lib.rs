//! Core library for the Aegis dashboard.
//!
//! Two pieces sit under every dashboard view:
//!
//! - [`auth::SessionManager`] owns the bearer token and its expiry, persists
//!   them across restarts, and performs login and logout.
//! - [`api::ApiClient`] issues requests with that token and classifies every
//!   outcome into an [`api::TypedResponse`]. A 401 logs the session out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use aegis_core::{ApiClient, Config, SessionManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let session = Arc::new(SessionManager::from_config(&config)?);
//! if !session.restore() {
//!     session.login("admin", "secret").await?;
//! }
//! let api = ApiClient::for_session(&session, &config);
//! let agents = api.fetch_agents().await;
//! match agents.data() {
//!     Some(list) => println!("{} agents", list.agents.len()),
//!     None => eprintln!("{}", agents.reason().unwrap_or_default()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, RequestOptions, ResponseKind, TypedResponse};
pub use auth::{AuthError, Session, SessionManager, SessionSnapshot};
pub use config::Config;
