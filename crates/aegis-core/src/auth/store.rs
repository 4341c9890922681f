//! Persistent storage for the session token and its expiry.
//!
//! Every backend stores exactly two values under fixed keys
//! (`aegis_token`, `aegis_token_expiry`) and writes or clears them together.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::session::PersistedSession;

/// Key under which the bearer token is stored
pub const TOKEN_KEY: &str = "aegis_token";

/// Key under which the absolute expiry instant is stored
pub const EXPIRY_KEY: &str = "aegis_token_expiry";

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "aegis-dashboard";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session storage is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Persisted session is incomplete: {0}")]
    Incomplete(&'static str),

    #[error("Persisted expiry is not a valid timestamp: {0}")]
    BadExpiry(String),
}

/// Storage backend for the persisted session.
///
/// `load` returns `Ok(None)` when nothing is stored and an error when the
/// stored values are unreadable or only one of the two keys is present.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>, StoreError>;
    fn save(&self, session: &PersistedSession) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Raw on-disk shape; both keys optional so partial files can be detected.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(rename = "aegis_token", default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(rename = "aegis_token_expiry", default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// JSON file with the two session keys.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store the session in `session.json` inside `dir`
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let file: SessionFile = serde_json::from_str(&contents)?;
        match (file.token, file.expires_at) {
            (Some(token), Some(expires_at)) => Ok(Some(PersistedSession { token, expires_at })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(StoreError::Incomplete(EXPIRY_KEY)),
            (None, Some(_)) => Err(StoreError::Incomplete(TOKEN_KEY)),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, contents)?;
        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Session file removed");
        }
        Ok(())
    }
}

/// OS keychain, one entry per key.
pub struct KeyringSessionStore {
    service: String,
}

impl KeyringSessionStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key)?)
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for KeyringSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let token = self.read(TOKEN_KEY)?;
        let expiry = self.read(EXPIRY_KEY)?;
        match (token, expiry) {
            (Some(token), Some(raw)) => {
                let expires_at = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| StoreError::BadExpiry(raw.clone()))?
                    .with_timezone(&Utc);
                Ok(Some(PersistedSession { token, expires_at }))
            }
            (None, None) => Ok(None),
            (Some(_), None) => Err(StoreError::Incomplete(EXPIRY_KEY)),
            (None, Some(_)) => Err(StoreError::Incomplete(TOKEN_KEY)),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        write_pair(&self.entry(TOKEN_KEY)?, &self.entry(EXPIRY_KEY)?, session)
    }

    fn clear(&self) -> Result<(), StoreError> {
        // Attempt both deletes even if the first fails
        let token = self.delete(TOKEN_KEY);
        let expiry = self.delete(EXPIRY_KEY);
        token.and(expiry)
    }
}

/// Write token then expiry; if the expiry fails the token is removed again
/// so a lone token never stays behind.
fn write_pair(token: &Entry, expiry: &Entry, session: &PersistedSession) -> Result<(), StoreError> {
    token.set_password(&session.token)?;
    if let Err(e) = expiry.set_password(&session.expires_at.to_rfc3339()) {
        if let Err(cleanup) = token.delete_credential() {
            warn!(error = %cleanup, "Failed to remove token after expiry write failed");
        }
        return Err(e.into());
    }
    Ok(())
}

/// In-process store, for tests and embedding.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a persisted session
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            inner: Mutex::new(Some(session)),
        }
    }

    /// Current stored value, for inspection
    pub fn stored(&self) -> Option<PersistedSession> {
        self.inner.lock().map(|guard| guard.clone()).unwrap_or(None)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        Ok(self.stored())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(session.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = None;
        }
        Ok(())
    }
}
