use thiserror::Error;

use crate::api::error::NETWORK_ERROR_MESSAGE;

/// Generic message for a rejected login without a server `detail`
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";

/// Why a login attempt did not produce a session.
///
/// The display text is what the login form shows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server answered with a non-success status
    #[error("{0}")]
    Rejected(String),

    /// No response could be obtained
    #[error("{}", NETWORK_ERROR_MESSAGE)]
    Network,

    /// The server accepted the credentials but the response was unusable
    #[error("Login failed: {0}")]
    InvalidResponse(String),
}
