//! The session manager: sole owner of the authentication state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::client::build_http_client;
use crate::api::error::server_message;
use crate::api::{TokenSource, UnauthorizedHandler};
use crate::config::{Config, SessionBackend};

use super::error::LOGIN_FAILED_MESSAGE;
use super::store::{FileSessionStore, KeyringSessionStore, SessionStore};
use super::{AuthError, Session, SessionSnapshot};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Login response; every field optional so missing ones can be detected.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default)]
struct State {
    session: Session,
    last_error: Option<String>,
}

/// Marks a login as in progress for as long as it is alive.
struct LoginInProgress<'a>(&'a AtomicUsize);

impl<'a> LoginInProgress<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoginInProgress<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the current [`Session`], persists it, and exposes the login,
/// logout and restore transitions.
///
/// Share it as `Arc<SessionManager>`. The state lock is never held across
/// an `.await`, so readers (token lookups from in-flight requests) never
/// wait on a login round-trip.
pub struct SessionManager {
    http: Client,
    login_url: String,
    default_lifetime: Duration,
    store: Box<dyn SessionStore>,
    state: RwLock<State>,
    logins_in_progress: AtomicUsize,
}

impl SessionManager {
    /// Build a manager from config, with the configured storage backend
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = open_store(config)?;
        let http = build_http_client(config.request_timeout_secs)?;
        Ok(Self::with_http_client(http, config, store))
    }

    pub fn new(config: &Config, store: Box<dyn SessionStore>) -> Result<Self> {
        let http = build_http_client(config.request_timeout_secs)?;
        Ok(Self::with_http_client(http, config, store))
    }

    pub fn with_http_client(http: Client, config: &Config, store: Box<dyn SessionStore>) -> Self {
        Self {
            http,
            login_url: config.login_url(),
            default_lifetime: Duration::seconds(config.token_lifetime_secs()),
            store,
            state: RwLock::new(State::default()),
            logins_in_progress: AtomicUsize::new(0),
        }
    }

    /// Connection pool shared with API clients built from this manager
    pub fn http_client(&self) -> Client {
        self.http.clone()
    }

    // ===== Transitions =====

    /// Restore a persisted session on startup.
    ///
    /// Returns whether the restored session is authenticated. Expired,
    /// partial or unreadable persisted state is cleared.
    pub fn restore(&self) -> bool {
        let now = Utc::now();
        let session = match self.store.load() {
            Ok(Some(persisted)) => {
                let session = Session::from_persisted(persisted.token, persisted.expires_at);
                if session.is_authenticated_at(now) {
                    debug!(expires_at = %persisted.expires_at, "Restored persisted session");
                    session
                } else {
                    info!("Persisted session has expired, clearing it");
                    self.clear_store();
                    Session::anonymous()
                }
            }
            Ok(None) => Session::anonymous(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                self.clear_store();
                Session::anonymous()
            }
        };

        let authenticated = session.is_authenticated_at(now);
        self.write_state(|state| state.session = session);
        authenticated
    }

    /// Exchange credentials for a token.
    ///
    /// On success the new session replaces the current one and is persisted.
    /// On failure the current session is left as it was and the message is
    /// kept as [`last_error`](Self::last_error).
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let _in_progress = LoginInProgress::enter(&self.logins_in_progress);
        self.write_state(|state| state.last_error = None);

        let issued = self
            .request_token(username, password)
            .await
            .and_then(|(token, lifetime)| {
                Session::issued(token, lifetime, Utc::now())
                    .map(|session| (session, lifetime))
                    .ok_or_else(|| {
                        AuthError::InvalidResponse("token lifetime out of range".to_string())
                    })
            });

        match issued {
            Ok((session, lifetime)) => {
                if let Some(persisted) = session.to_persisted() {
                    if let Err(e) = self.store.save(&persisted) {
                        warn!(error = %e, "Failed to persist session");
                    }
                }
                info!(username = username, lifetime_secs = lifetime.num_seconds(), "Logged in");
                self.write_state(|state| state.session = session);
                Ok(())
            }
            Err(e) => {
                warn!(username = username, error = %e, "Login failed");
                let message = e.to_string();
                self.write_state(|state| state.last_error = Some(message));
                Err(e)
            }
        }
    }

    async fn request_token(&self, username: &str, password: &str) -> Result<(String, Duration), AuthError> {
        let response = self
            .http
            .post(&self.login_url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| {
                warn!(url = %self.login_url, error = %e, "Login request failed before a response");
                AuthError::Network
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<Value>().await.ok();
            let message = body
                .as_ref()
                .and_then(server_message)
                .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
            debug!(status = status.as_u16(), "Login rejected");
            return Err(AuthError::Rejected(message));
        }

        let grant: LoginResponse = response
            .json()
            .await
            .map_err(|_| AuthError::InvalidResponse("response is not valid JSON".to_string()))?;

        let token = grant
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("no access token issued".to_string()))?;

        if let Some(kind) = grant.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                warn!(token_type = kind, "Unexpected token type, using it as a bearer token");
            }
        }

        let lifetime = match grant.expires_in {
            Some(secs) if secs > 0 => Duration::try_seconds(secs).ok_or_else(|| {
                AuthError::InvalidResponse(format!("expires_in out of range: {}", secs))
            })?,
            _ => self.default_lifetime,
        };
        Ok((token, lifetime))
    }

    /// Drop the session and its persisted values. Idempotent.
    pub fn logout(&self) {
        self.clear_store();
        let was_authenticated = self.write_state(|state| {
            let was = state.session.is_authenticated();
            state.session = Session::anonymous();
            was
        });
        if was_authenticated {
            info!("Logged out");
        } else {
            debug!("Logout on an already unauthenticated session");
        }
    }

    // ===== Read-only view =====

    /// Current bearer token, or `None` when absent or expired
    pub fn current_token(&self) -> Option<String> {
        let now = Utc::now();
        self.read_state(|state| state.session.token_at(now).map(str::to_string))
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_state(|state| state.session.is_authenticated())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read_state(|state| state.session.expires_at())
    }

    /// Time left on the current token
    pub fn expires_in(&self) -> Duration {
        let now = Utc::now();
        self.read_state(|state| state.session.time_until_expiry(now))
    }

    /// Message of the most recent failed login, cleared by the next attempt
    pub fn last_error(&self) -> Option<String> {
        self.read_state(|state| state.last_error.clone())
    }

    pub fn is_logging_in(&self) -> bool {
        self.logins_in_progress.load(Ordering::SeqCst) > 0
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Utc::now();
        let (is_authenticated, expires_at, last_error) = self.read_state(|state| {
            let authenticated = state.session.is_authenticated_at(now);
            (
                authenticated,
                state.session.expires_at().filter(|_| authenticated),
                state.last_error.clone(),
            )
        });
        SessionSnapshot {
            is_authenticated,
            expires_at,
            last_error,
            is_logging_in: self.is_logging_in(),
        }
    }

    // ===== Accessors for the request layer =====

    pub fn token_source(self: &Arc<Self>) -> TokenSource {
        let manager = Arc::clone(self);
        Arc::new(move || manager.current_token())
    }

    pub fn unauthorized_handler(self: &Arc<Self>) -> UnauthorizedHandler {
        let manager = Arc::clone(self);
        Arc::new(move || manager.logout())
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    fn read_state<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Open the session store selected in config
pub fn open_store(config: &Config) -> Result<Box<dyn SessionStore>> {
    match config.session_backend {
        SessionBackend::File => {
            let dir = config
                .data_dir()
                .context("Could not determine where to store the session")?;
            Ok(Box::new(FileSessionStore::new(&dir)))
        }
        SessionBackend::Keyring => Ok(Box::new(KeyringSessionStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::PersistedSession;
    use crate::auth::store::{MemorySessionStore, StoreError};
    use mockito::{Matcher, Server};
    use serde_json::json;

    /// Store wrapper that counts reads and clears
    #[derive(Default)]
    struct CountingStore {
        inner: MemorySessionStore,
        loads: AtomicUsize,
        clears: AtomicUsize,
    }

    impl SessionStore for Arc<CountingStore> {
        fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load()
        }

        fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
            self.inner.save(session)
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            self.inner.clear()
        }
    }

    fn manager_for(base_url: &str) -> (SessionManager, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        let config = Config {
            api_base_url: base_url.to_string(),
            ..Config::default()
        };
        let manager = SessionManager::new(&config, Box::new(store.clone())).unwrap();
        (manager, store)
    }

    #[test]
    fn test_restore_valid_session() {
        let (manager, store) = manager_for("http://127.0.0.1:1");
        let expires_at = Utc::now() + Duration::minutes(10);
        store
            .inner
            .save(&PersistedSession {
                token: "persisted".to_string(),
                expires_at,
            })
            .unwrap();

        assert!(manager.restore());
        assert_eq!(manager.current_token().as_deref(), Some("persisted"));
        assert_eq!(manager.expires_at(), Some(expires_at));
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.clears.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restore_expired_session_clears_store() {
        let (manager, store) = manager_for("http://127.0.0.1:1");
        store
            .inner
            .save(&PersistedSession {
                token: "stale".to_string(),
                expires_at: Utc::now() - Duration::seconds(1),
            })
            .unwrap();

        assert!(!manager.restore());
        assert!(!manager.is_authenticated());
        assert!(manager.current_token().is_none());
        assert!(store.inner.stored().is_none());
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.clears.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restore_with_nothing_persisted() {
        let (manager, store) = manager_for("http://127.0.0.1:1");
        assert!(!manager.restore());
        assert_eq!(store.clears.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_logout_is_idempotent() {
        let (manager, store) = manager_for("http://127.0.0.1:1");
        store
            .inner
            .save(&PersistedSession {
                token: "tok".to_string(),
                expires_at: Utc::now() + Duration::minutes(5),
            })
            .unwrap();
        manager.restore();

        manager.logout();
        let once = manager.snapshot();
        manager.logout();
        let twice = manager.snapshot();

        assert_eq!(once, twice);
        assert!(!twice.is_authenticated);
        assert!(twice.expires_at.is_none());
        assert!(manager.current_token().is_none());
        assert!(store.inner.stored().is_none());
    }

    #[tokio::test]
    async fn test_login_success_persists_session() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/admin/login")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"username": "admin", "password": "hunter2"})))
            .with_status(200)
            .with_body(r#"{"access_token": "jwt-abc", "token_type": "bearer", "expires_in": 1800}"#)
            .create_async()
            .await;

        let (manager, store) = manager_for(&server.url());
        let before = Utc::now();
        manager.login("admin", "hunter2").await.unwrap();
        let after = Utc::now();

        mock.assert_async().await;
        assert!(manager.is_authenticated());
        assert!(!manager.is_logging_in());
        assert_eq!(manager.current_token().as_deref(), Some("jwt-abc"));
        assert!(manager.last_error().is_none());

        let expires_at = manager.expires_at().unwrap();
        assert!(expires_at >= before + Duration::seconds(1800));
        assert!(expires_at <= after + Duration::seconds(1800));

        let persisted = store.inner.stored().unwrap();
        assert_eq!(persisted.token, "jwt-abc");
        assert_eq!(persisted.expires_at, expires_at);
    }

    #[tokio::test]
    async fn test_login_without_expiry_uses_default_lifetime() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .with_status(200)
            .with_body(r#"{"access_token": "jwt-abc"}"#)
            .create_async()
            .await;

        let store = Arc::new(CountingStore::default());
        let config = Config {
            api_base_url: server.url(),
            default_token_lifetime_secs: 600,
            ..Config::default()
        };
        let manager = SessionManager::new(&config, Box::new(store)).unwrap();

        manager.login("admin", "pw").await.unwrap();
        let remaining = manager.expires_in();
        assert!(remaining > Duration::seconds(590));
        assert!(remaining <= Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_login_rejected_surfaces_detail() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .with_status(401)
            .with_body(r#"{"detail": "Invalid username or password"}"#)
            .create_async()
            .await;

        let (manager, store) = manager_for(&server.url());
        let err = manager.login("admin", "wrong").await.unwrap_err();

        assert_eq!(err, AuthError::Rejected("Invalid username or password".to_string()));
        assert_eq!(manager.last_error().as_deref(), Some("Invalid username or password"));
        assert!(!manager.is_authenticated());
        assert!(!manager.is_logging_in());
        assert!(store.inner.stored().is_none());
    }

    #[tokio::test]
    async fn test_login_rejected_without_detail() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .with_status(400)
            .create_async()
            .await;

        let (manager, _) = manager_for(&server.url());
        let err = manager.login("admin", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), LOGIN_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn test_login_success_without_token_is_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .with_status(200)
            .with_body(r#"{"token_type": "bearer"}"#)
            .create_async()
            .await;

        let (manager, store) = manager_for(&server.url());
        let err = manager.login("admin", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert!(!manager.is_authenticated());
        assert!(store.inner.stored().is_none());
    }

    #[tokio::test]
    async fn test_login_network_failure() {
        let (manager, _) = manager_for("http://127.0.0.1:1");
        let err = manager.login("admin", "pw").await.unwrap_err();

        assert_eq!(err, AuthError::Network);
        assert_eq!(
            manager.last_error().as_deref(),
            Some(crate::api::error::NETWORK_ERROR_MESSAGE)
        );
        assert!(!manager.is_logging_in());
    }

    #[tokio::test]
    async fn test_new_attempt_clears_previous_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .match_body(Matcher::PartialJson(json!({"password": "wrong"})))
            .with_status(401)
            .with_body(r#"{"detail": "Invalid username or password"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/admin/login")
            .match_body(Matcher::PartialJson(json!({"password": "right"})))
            .with_status(200)
            .with_body(r#"{"access_token": "jwt", "expires_in": 60}"#)
            .create_async()
            .await;

        let (manager, _) = manager_for(&server.url());
        assert!(manager.login("admin", "wrong").await.is_err());
        assert!(manager.last_error().is_some());

        manager.login("admin", "right").await.unwrap();
        assert!(manager.last_error().is_none());
        assert!(manager.snapshot().is_authenticated);
    }

    #[test]
    fn test_accessors_follow_session() {
        let (manager, store) = manager_for("http://127.0.0.1:1");
        store
            .inner
            .save(&PersistedSession {
                token: "tok".to_string(),
                expires_at: Utc::now() + Duration::minutes(5),
            })
            .unwrap();
        let manager = Arc::new(manager);
        manager.restore();

        let token_source = manager.token_source();
        let on_unauthorized = manager.unauthorized_handler();
        assert_eq!(token_source().as_deref(), Some("tok"));

        on_unauthorized();
        assert!(token_source().is_none());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_with_huge_expires_in_is_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .with_status(200)
            .with_body(r#"{"access_token": "tok", "expires_in": 9000000000000000}"#)
            .create_async()
            .await;

        let (manager, store) = manager_for(&server.url());
        let err = manager.login("admin", "pw").await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert!(!manager.is_authenticated());
        assert!(!manager.is_logging_in());
        assert!(manager.last_error().is_some());
        assert!(store.inner.stored().is_none());

        server
            .mock("POST", "/admin/login")
            .with_status(200)
            .with_body(r#"{"access_token": "tok", "expires_in": 9223372036854775807}"#)
            .create_async()
            .await;
        let err = manager.login("admin", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_invalid_configured_lifetime_still_authenticates() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/admin/login")
            .with_status(200)
            .with_body(r#"{"access_token": "tok"}"#)
            .create_async()
            .await;

        let config = Config {
            api_base_url: server.url(),
            default_token_lifetime_secs: 0,
            ..Config::default()
        };
        let manager =
            SessionManager::new(&config, Box::new(MemorySessionStore::new())).unwrap();

        manager.login("admin", "pw").await.unwrap();
        assert!(manager.is_authenticated());
        assert!(manager.expires_in() > Duration::seconds(1790));
    }

    #[tokio::test]
    async fn test_logging_in_flag_while_request_pending() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::sync::oneshot;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Accepts the login request, then answers only once released
        let gateway = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = release_rx.await;
            let body = r#"{"access_token": "jwt", "expires_in": 60}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let (manager, _) = manager_for(&format!("http://{}", addr));
        let manager = Arc::new(manager);
        assert!(!manager.is_logging_in());

        let login = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.login("admin", "pw").await }
        });

        for _ in 0..200 {
            if manager.is_logging_in() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(manager.is_logging_in());
        assert!(manager.snapshot().is_logging_in);
        assert!(!manager.is_authenticated());

        release_tx.send(()).unwrap();
        login.await.unwrap().unwrap();
        gateway.await.unwrap();

        assert!(!manager.is_logging_in());
        assert!(!manager.snapshot().is_logging_in);
        assert!(manager.is_authenticated());
    }
}
