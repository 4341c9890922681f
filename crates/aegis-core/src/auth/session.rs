use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The client-held authentication record.
///
/// A `Session` is an immutable value: every transition (login, logout,
/// restore, expiry) builds a new one. Validity is always checked against
/// `expires_at`, never by the mere presence of a token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// The unauthenticated session
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Session for a freshly issued token with the given lifetime.
    /// `None` when the expiry falls outside the representable range.
    pub fn issued(token: String, lifetime: Duration, now: DateTime<Utc>) -> Option<Self> {
        let expires_at = now.checked_add_signed(lifetime)?;
        Some(Self {
            token: Some(token),
            expires_at: Some(expires_at),
        })
    }

    /// Session rebuilt from persisted values
    pub fn from_persisted(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: Some(token),
            expires_at: Some(expires_at),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    /// True only when a non-empty token exists and its expiry lies strictly after `now`.
    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expires_at) {
            (Some(token), Some(expires_at)) => !token.is_empty() && expires_at > now,
            _ => false,
        }
    }

    /// The bearer token, if the session is valid at `now`
    pub fn token_at(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.is_authenticated_at(now) {
            self.token.as_deref()
        } else {
            None
        }
    }

    /// Time left before expiry (zero when expired or anonymous)
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .map(|expires_at| (expires_at - now).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    /// Values to write to the session store, if there is anything to persist
    pub fn to_persisted(&self) -> Option<PersistedSession> {
        match (&self.token, self.expires_at) {
            (Some(token), Some(expires_at)) => Some(PersistedSession {
                token: token.clone(),
                expires_at,
            }),
            _ => None,
        }
    }
}

/// The two values that survive a restart. Always written and cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(rename = "aegis_token")]
    pub token: String,
    #[serde(rename = "aegis_token_expiry")]
    pub expires_at: DateTime<Utc>,
}

/// Read-only view of the session for presentation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionSnapshot {
    pub is_authenticated: bool,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_logging_in: bool,
}
