//! Client configuration management.
//!
//! This module handles loading and saving the dashboard configuration,
//! which includes the gateway base URL, the login endpoint, the default
//! token lifetime and the last used username.
//!
//! Configuration is stored at `~/.config/aegis-dashboard/config.json`.
//! A few values can be overridden from the environment (see [`Config::apply_env`]).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "aegis-dashboard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Gateway address used when nothing is configured
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// Login endpoint, relative to the base URL
const DEFAULT_LOGIN_PATH: &str = "/admin/login";

/// Token lifetime applied when the login response omits `expires_in`.
/// Matches the gateway's 30 minute access token expiry.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 1800;

/// Longest token lifetime accepted from config, one year.
const MAX_TOKEN_LIFETIME_SECS: i64 = 366 * 24 * 60 * 60;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_BASE: &str = "AEGIS_API_BASE";
const ENV_LOGIN_PATH: &str = "AEGIS_LOGIN_PATH";
const ENV_TOKEN_LIFETIME: &str = "AEGIS_TOKEN_LIFETIME_SECS";

/// Where the session token and expiry are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// JSON file in the user data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub login_path: String,
    pub default_token_lifetime_secs: i64,
    pub request_timeout_secs: u64,
    pub session_backend: SessionBackend,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            default_token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            session_backend: SessionBackend::default(),
            last_username: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load a config file from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            debug!(path = %path.display(), "Config loaded");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `AEGIS_*` environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) {
        if let Ok(base) = std::env::var(ENV_API_BASE) {
            self.api_base_url = base;
        }
        if let Ok(path) = std::env::var(ENV_LOGIN_PATH) {
            self.login_path = path;
        }
        if let Ok(raw) = std::env::var(ENV_TOKEN_LIFETIME) {
            match raw.parse::<i64>() {
                Ok(secs) if secs > 0 => self.default_token_lifetime_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_TOKEN_LIFETIME),
            }
        }
    }

    /// Configured default token lifetime, or the built-in default when the
    /// configured value is not a positive number of seconds within a year.
    pub fn token_lifetime_secs(&self) -> i64 {
        let secs = self.default_token_lifetime_secs;
        if (1..=MAX_TOKEN_LIFETIME_SECS).contains(&secs) {
            secs
        } else {
            warn!(value = secs, "Ignoring invalid default_token_lifetime_secs");
            DEFAULT_TOKEN_LIFETIME_SECS
        }
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// Absolute URL of the login endpoint
    pub fn login_url(&self) -> String {
        join_url(self.base_url(), &self.login_path)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session file
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}

/// Join a base URL and an endpoint path with exactly one slash between them.
pub(crate) fn join_url(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}
