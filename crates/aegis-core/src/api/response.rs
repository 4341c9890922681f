//! The uniform result of one request.

use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::ApiError;

/// Which case of the outcome taxonomy a response fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum ResponseKind {
    Success,
    NetworkFailure,
    InvalidResponse,
    AuthenticationRequired,
    RateLimited,
    ClientError,
    ServerError,
    MalformedInput,
}

impl From<&ApiError> for ResponseKind {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::NetworkFailure => ResponseKind::NetworkFailure,
            ApiError::InvalidResponse => ResponseKind::InvalidResponse,
            ApiError::AuthenticationRequired => ResponseKind::AuthenticationRequired,
            ApiError::RateLimited { .. } => ResponseKind::RateLimited,
            ApiError::ClientError { .. } => ResponseKind::ClientError,
            ApiError::ServerError { .. } => ResponseKind::ServerError,
            ApiError::MalformedInput(_) => ResponseKind::MalformedInput,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome<T> {
    Data(T),
    Failure { error: ApiError, message: String },
}

/// Result of [`ApiClient::call`](super::ApiClient::call).
///
/// Holds either a success payload or a failure message, never both and
/// never neither. `error()` and `reason()` return the same message.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedResponse<T> {
    status: u16,
    outcome: Outcome<T>,
}

impl<T> TypedResponse<T> {
    pub fn success(status: u16, data: T) -> Self {
        Self {
            status,
            outcome: Outcome::Data(data),
        }
    }

    pub fn failure(error: ApiError) -> Self {
        let message = error.to_string();
        Self {
            status: error.status(),
            outcome: Outcome::Failure { error, message },
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn kind(&self) -> ResponseKind {
        match &self.outcome {
            Outcome::Data(_) => ResponseKind::Success,
            Outcome::Failure { error, .. } => ResponseKind::from(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Data(_))
    }

    pub fn data(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Data(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self.outcome {
            Outcome::Data(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Data(_) => None,
            Outcome::Failure { message, .. } => Some(message.as_str()),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.error()
    }

    /// The classified failure, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match &self.outcome {
            Outcome::Data(_) => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match self.outcome {
            Outcome::Data(data) => Ok(data),
            Outcome::Failure { error, .. } => Err(error),
        }
    }

    /// Transform the success payload, keeping status and failure untouched
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> TypedResponse<U> {
        let outcome = match self.outcome {
            Outcome::Data(data) => Outcome::Data(f(data)),
            Outcome::Failure { error, message } => Outcome::Failure { error, message },
        };
        TypedResponse {
            status: self.status,
            outcome,
        }
    }
}

/// Serializes as `{status, kind, data}` or `{status, kind, error, reason}`.
impl<T: Serialize> Serialize for TypedResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.outcome {
            Outcome::Data(data) => {
                let mut state = serializer.serialize_struct("TypedResponse", 3)?;
                state.serialize_field("status", &self.status)?;
                state.serialize_field("kind", &self.kind())?;
                state.serialize_field("data", data)?;
                state.end()
            }
            Outcome::Failure { message, .. } => {
                let mut state = serializer.serialize_struct("TypedResponse", 4)?;
                state.serialize_field("status", &self.status)?;
                state.serialize_field("kind", &self.kind())?;
                state.serialize_field("error", message)?;
                state.serialize_field("reason", message)?;
                state.end()
            }
        }
    }
}
