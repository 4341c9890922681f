//! API client for communicating with the Aegis policy gateway.
//!
//! This module provides the `ApiClient` struct. Its single primitive,
//! [`ApiClient::call`], performs one HTTP request and folds every outcome
//! (transport failure, 401, 429, other 4xx, 5xx, 2xx) into a
//! [`TypedResponse`]. The endpoint helpers below it are thin wrappers that
//! only pick the path, method, headers and payload type.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::config::{join_url, Config};
use crate::models::{
    AgentsResponse, ApprovalRequest, ApprovalResponse, DecisionsResponse, PolicySummary,
    ToolCallOutcome,
};

use super::error::body_retry_after;
use super::{ApiError, TypedResponse};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout used when no config is supplied.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header naming the calling agent on gateway tool calls
const AGENT_ID_HEADER: &str = "X-Agent-ID";

/// Header naming the parent agent in a call chain
const PARENT_AGENT_HEADER: &str = "X-Parent-Agent";

/// "Get current token" accessor injected by the session owner.
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// "On unauthorized" callback injected by the session owner.
pub type UnauthorizedHandler = Arc<dyn Fn() + Send + Sync>;

/// Request payload as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Already-structured JSON
    Json(Value),
    /// JSON text typed by a user; validated before any network call
    Raw(String),
    /// A body that failed to serialize; carries the serializer error
    Invalid(String),
}

impl RequestBody {
    fn into_value(self) -> Result<Value, ApiError> {
        match self {
            RequestBody::Json(value) => Ok(value),
            RequestBody::Raw(text) => serde_json::from_str(&text)
                .map_err(|e| ApiError::MalformedInput(format!("invalid JSON body: {}", e))),
            RequestBody::Invalid(e) => Err(ApiError::MalformedInput(format!(
                "body cannot be serialized: {}",
                e
            ))),
        }
    }
}

/// Method, headers, query and body of one call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Attach a serializable body. A value that cannot be turned into JSON
    /// surfaces later as a malformed-input response.
    pub fn json<B: Serialize>(mut self, body: &B) -> Self {
        self.body = Some(match serde_json::to_value(body) {
            Ok(value) => RequestBody::Json(value),
            Err(e) => RequestBody::Invalid(e.to_string()),
        });
        self
    }

    /// Attach JSON text as typed by a user
    pub fn raw_json(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Raw(text.into()));
        self
    }
}

/// API client for the Aegis gateway.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token_source: TokenSource,
    on_unauthorized: UnauthorizedHandler,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client with its own connection pool
    pub fn new(
        base_url: &str,
        token_source: TokenSource,
        on_unauthorized: UnauthorizedHandler,
    ) -> Result<Self> {
        let client = build_http_client(REQUEST_TIMEOUT_SECS)?;
        Ok(Self::with_http_client(client, base_url, token_source, on_unauthorized))
    }

    /// Create a client sharing an existing connection pool
    pub fn with_http_client(
        client: Client,
        base_url: &str,
        token_source: TokenSource,
        on_unauthorized: UnauthorizedHandler,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_source,
            on_unauthorized,
        }
    }

    /// Client bound to a session manager: tokens come from it and a 401
    /// logs it out.
    pub fn for_session(session: &Arc<SessionManager>, config: &Config) -> Self {
        Self::with_http_client(
            session.http_client(),
            config.base_url(),
            session.token_source(),
            session.unauthorized_handler(),
        )
    }

    /// Client that never sends a token and ignores 401s
    pub fn anonymous(base_url: &str) -> Result<Self> {
        Self::new(base_url, Arc::new(|| None), Arc::new(|| {}))
    }

    /// Client that sends a fixed API key as its bearer token. There is no
    /// session to end, so a 401 is only logged.
    pub fn with_api_key(base_url: &str, api_key: &str) -> Result<Self> {
        let key = api_key.to_string();
        Self::new(
            base_url,
            Arc::new(move || Some(key.clone())),
            Arc::new(|| warn!("API key was rejected by the gateway")),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one request and classify its outcome. Never fails: every
    /// failure is returned inside the [`TypedResponse`].
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> TypedResponse<T> {
        match self.execute(endpoint, options).await {
            Ok((status, data)) => TypedResponse::success(status, data),
            Err(err) => {
                debug!(endpoint = endpoint, status = err.status(), error = %err, "Request failed");
                TypedResponse::failure(err)
            }
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<(u16, T), ApiError> {
        // Local validation happens before anything touches the network
        let body = options.body.map(RequestBody::into_value).transpose()?;
        // One token snapshot per call; a concurrent logout cannot change it
        let token = (self.token_source)();
        let headers = build_headers(token.as_deref(), &options.headers)?;

        let url = join_url(&self.base_url, endpoint);
        let mut request = self
            .client
            .request(options.method.clone(), &url)
            .headers(headers);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(ref body) = body {
            request = request.json(body);
        }

        debug!(method = %options.method, url = %url, authenticated = token.is_some(), "Sending request");
        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed before a response");
            ApiError::NetworkFailure
        })?;

        self.classify(response).await
    }

    /// Map a response to a payload or a failure, in fixed priority order:
    /// 401, 429, other 4xx, 5xx, then success.
    async fn classify<T: DeserializeOwned>(&self, response: Response) -> Result<(u16, T), ApiError> {
        let status = response.status().as_u16();
        match status {
            401 => {
                warn!("Received 401, clearing session");
                (self.on_unauthorized)();
                Err(ApiError::AuthenticationRequired)
            }
            429 => {
                let header_hint = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                let retry_after = match header_hint {
                    Some(hint) => Some(hint),
                    None => response
                        .json::<Value>()
                        .await
                        .ok()
                        .as_ref()
                        .and_then(body_retry_after),
                };
                warn!(retry_after = ?retry_after, "Rate limited");
                Err(ApiError::RateLimited { retry_after })
            }
            400..=499 => {
                let body = response.json::<Value>().await.ok();
                Err(ApiError::client_error(status, body.as_ref()))
            }
            500..=u16::MAX => {
                warn!(status = status, "Server error");
                Err(ApiError::ServerError { status })
            }
            _ => {
                let bytes = response.bytes().await.map_err(|e| {
                    warn!(error = %e, "Failed to read response body");
                    ApiError::NetworkFailure
                })?;
                // An empty success body decodes like JSON null
                let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
                    b"null"
                } else {
                    &bytes
                };
                serde_json::from_slice(raw)
                    .map(|data| (status, data))
                    .map_err(|e| {
                        warn!(status = status, error = %e, "Failed to parse response body");
                        ApiError::InvalidResponse
                    })
            }
        }
    }

    // ===== Gateway Endpoints =====

    /// `GET /admin/agents`
    pub async fn fetch_agents(&self) -> TypedResponse<AgentsResponse> {
        self.call("/admin/agents", RequestOptions::get()).await
    }

    /// `GET /admin/policies`
    pub async fn fetch_policy_summary(&self) -> TypedResponse<PolicySummary> {
        self.call("/admin/policies", RequestOptions::get()).await
    }

    /// `GET /admin/decisions?limit=N`, newest first
    pub async fn fetch_recent_decisions(&self, limit: u32) -> TypedResponse<DecisionsResponse> {
        self.call("/admin/decisions", RequestOptions::get().query("limit", limit))
            .await
    }

    /// `POST /approve/{approval_id}`
    pub async fn approve_action(
        &self,
        approval_id: &str,
        approved_by: &str,
    ) -> TypedResponse<ApprovalResponse> {
        if !is_path_segment(approval_id) {
            return TypedResponse::failure(ApiError::MalformedInput(format!(
                "invalid approval id: {:?}",
                approval_id
            )));
        }
        let body = ApprovalRequest {
            approved_by: approved_by.to_string(),
        };
        self.call(
            &format!("/approve/{}", approval_id),
            RequestOptions::post().json(&body),
        )
        .await
    }

    /// `POST /tools/{tool}/{action}` on behalf of `agent_id`.
    ///
    /// `params` is JSON text (an empty object when `None`); invalid JSON is
    /// reported without sending anything.
    pub async fn test_tool_call(
        &self,
        agent_id: &str,
        tool: &str,
        action: &str,
        params: Option<&str>,
        parent_agent: Option<&str>,
    ) -> TypedResponse<ToolCallOutcome> {
        for (what, segment) in [("tool", tool), ("action", action)] {
            if !is_path_segment(segment) {
                return TypedResponse::failure(ApiError::MalformedInput(format!(
                    "invalid {}: {:?}",
                    what, segment
                )));
            }
        }

        let mut options = RequestOptions::post()
            .header(AGENT_ID_HEADER, agent_id)
            .raw_json(params.unwrap_or("{}"));
        if let Some(parent) = parent_agent {
            options = options.header(PARENT_AGENT_HEADER, parent);
        }

        let response: TypedResponse<Value> = self
            .call(&format!("/tools/{}/{}", tool, action), options)
            .await;
        let status = response.status();
        response.map(|body| ToolCallOutcome::from_body(status, body))
    }

    /// `GET /healthz`
    pub async fn health(&self) -> TypedResponse<Value> {
        self.call("/healthz", RequestOptions::get()).await
    }
}

/// Build the shared reqwest client
pub(crate) fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// Content type and bearer credential first, then caller headers, which
/// override anything with the same name.
fn build_headers(token: Option<&str>, extra: &[(String, String)]) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::MalformedInput("token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
    }
    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::MalformedInput(format!("invalid header name: {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::MalformedInput(format!("invalid value for header {}", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
