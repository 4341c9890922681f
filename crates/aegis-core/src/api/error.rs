use serde_json::Value;
use thiserror::Error;

/// Message shown when no response could be obtained
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";

/// Message shown for any 401, whatever the server sent
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required. Please log in again.";

/// Message shown for any 5xx; the body is never trusted
pub const SERVER_ERROR_MESSAGE: &str = "Server error. Please try again later.";

/// Message shown when a 2xx body cannot be decoded into the expected shape
pub const INVALID_RESPONSE_MESSAGE: &str = "Invalid response from server";

/// Locally generated status for malformed caller input
pub const MALFORMED_INPUT_STATUS: u16 = 400;

/// Every failure a request can end in. Each case carries the status
/// reported in the typed response and renders its own display message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{}", NETWORK_ERROR_MESSAGE)]
    NetworkFailure,

    #[error("{}", INVALID_RESPONSE_MESSAGE)]
    InvalidResponse,

    #[error("{}", AUTH_REQUIRED_MESSAGE)]
    AuthenticationRequired,

    #[error("{}", rate_limit_message(.retry_after.as_deref()))]
    RateLimited { retry_after: Option<String> },

    #[error("{message}")]
    ClientError { status: u16, message: String },

    #[error("{}", SERVER_ERROR_MESSAGE)]
    ServerError { status: u16 },

    #[error("Invalid request: {0}")]
    MalformedInput(String),
}

impl ApiError {
    /// Numeric status reported for this failure; `0` means no response
    pub fn status(&self) -> u16 {
        match self {
            ApiError::NetworkFailure | ApiError::InvalidResponse => 0,
            ApiError::AuthenticationRequired => 401,
            ApiError::RateLimited { .. } => 429,
            ApiError::ClientError { status, .. } | ApiError::ServerError { status } => *status,
            ApiError::MalformedInput(_) => MALFORMED_INPUT_STATUS,
        }
    }

    /// Build a client error (4xx other than 401/429) from an optional JSON body
    pub fn client_error(status: u16, body: Option<&Value>) -> Self {
        let message = body
            .and_then(server_message)
            .unwrap_or_else(|| format!("Client error {}", status));
        ApiError::ClientError { status, message }
    }
}

fn rate_limit_message(retry_after: Option<&str>) -> String {
    match retry_after {
        Some(secs) if secs.parse::<u64>().is_ok() => {
            format!("Rate limit exceeded. Try again in {} seconds.", secs)
        }
        // Retry-After may also be an HTTP date
        Some(when) => format!("Rate limit exceeded. Try again after {}.", when),
        None => "Rate limit exceeded. Please try again later.".to_string(),
    }
}

/// Pull a human-readable message out of an error body.
///
/// Looks at `detail`, then `error`, then `reason`. A `detail` object (as the
/// gateway's rate limiter produces) contributes its `message` field.
pub(crate) fn server_message(body: &Value) -> Option<String> {
    ["detail", "error", "reason"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
}

/// Retry hint carried in an error body, e.g. `{"detail": {"retry_after": 60}}`
pub(crate) fn body_retry_after(body: &Value) -> Option<String> {
    let hint = body
        .get("detail")
        .and_then(|detail| detail.get("retry_after"))
        .or_else(|| body.get("retry_after"))?;
    match hint {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
