//! Session manager and API client working together against a mock gateway.

use std::sync::Arc;

use aegis_core::auth::{FileSessionStore, MemorySessionStore, SessionStore};
use aegis_core::{ApiClient, Config, RequestOptions, ResponseKind, SessionManager, TypedResponse};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::Value;

fn config_for(server: &ServerGuard) -> Config {
    Config {
        api_base_url: server.url(),
        ..Config::default()
    }
}

async fn logged_in(server: &mut ServerGuard, store: Box<dyn SessionStore>) -> Arc<SessionManager> {
    server
        .mock("POST", "/admin/login")
        .with_status(200)
        .with_body(r#"{"access_token": "tok-1", "token_type": "bearer", "expires_in": 1800}"#)
        .create_async()
        .await;

    let session = Arc::new(SessionManager::new(&config_for(server), store).unwrap());
    session.login("admin", "admin123").await.unwrap();
    session
}

#[tokio::test]
async fn test_401_logs_the_session_out() {
    let mut server = Server::new_async().await;
    let session = logged_in(&mut server, Box::new(MemorySessionStore::new())).await;
    let api = ApiClient::for_session(&session, &config_for(&server));

    server
        .mock("GET", "/admin/agents")
        .match_header("authorization", "Bearer tok-1")
        .with_status(401)
        .with_body(r#"{"detail": "Invalid authentication credentials"}"#)
        .create_async()
        .await;
    let anonymous = server
        .mock("GET", "/admin/policies")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .create_async()
        .await;

    let resp = api.fetch_agents().await;
    assert_eq!(resp.status(), 401);
    assert!(!session.is_authenticated());

    // Later calls go out without a token
    let resp = api.fetch_policy_summary().await;
    assert_eq!(resp.kind(), ResponseKind::AuthenticationRequired);
    anonymous.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_calls_survive_logout() {
    let mut server = Server::new_async().await;
    let session = logged_in(&mut server, Box::new(MemorySessionStore::new())).await;
    let api = ApiClient::for_session(&session, &config_for(&server));

    server
        .mock("GET", "/admin/agents")
        .with_status(401)
        .create_async()
        .await;
    let decisions = server
        .mock("GET", "/admin/decisions")
        .match_query(Matcher::UrlEncoded("limit".into(), "10".into()))
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_body(r#"{"decisions": [{"agent_id": "finance-agent", "decision": "allow"}]}"#)
        .create_async()
        .await;

    // Both futures snapshot the token before either response is classified
    let (agents, recent) = futures::join!(api.fetch_agents(), api.fetch_recent_decisions(10));

    assert_eq!(agents.status(), 401);
    assert_eq!(recent.status(), 200);
    assert_eq!(recent.data().unwrap().decisions.len(), 1);
    decisions.assert_async().await;
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_many_parallel_401s_are_harmless() {
    let mut server = Server::new_async().await;
    let session = logged_in(&mut server, Box::new(MemorySessionStore::new())).await;
    let api = ApiClient::for_session(&session, &config_for(&server));

    server
        .mock("GET", Matcher::Regex(r"^/panel/\d+$".to_string()))
        .with_status(401)
        .expect(8)
        .create_async()
        .await;

    let calls = (0..8).map(|i| {
        let api = api.clone();
        tokio::spawn(async move {
            let resp: TypedResponse<Value> = api.call(&format!("/panel/{}", i), RequestOptions::get()).await;
            resp.status()
        })
    });
    for handle in futures::future::join_all(calls).await {
        assert_eq!(handle.unwrap(), 401);
    }

    let snapshot = session.snapshot();
    assert!(!snapshot.is_authenticated);
    assert!(snapshot.expires_at.is_none());
}

#[tokio::test]
async fn test_session_survives_restart_via_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = Server::new_async().await;

    let first = logged_in(&mut server, Box::new(FileSessionStore::new(dir.path()))).await;
    let expires_at = first.expires_at();
    drop(first);

    let restarted = SessionManager::new(
        &config_for(&server),
        Box::new(FileSessionStore::new(dir.path())),
    )
    .unwrap();
    assert!(restarted.restore());
    assert_eq!(restarted.current_token().as_deref(), Some("tok-1"));
    assert_eq!(restarted.expires_at(), expires_at);

    restarted.logout();
    let again = SessionManager::new(
        &config_for(&server),
        Box::new(FileSessionStore::new(dir.path())),
    )
    .unwrap();
    assert!(!again.restore());
}
