//! Error types for the provider gateway.
//!
//! [`ProviderError`] is the only failure a caller of
//! [`Provider::generate`](crate::Provider::generate) sees. The variants
//! encode retry policy: [`ProviderError::is_transient`] decides whether the
//! gateway backs off and tries again or surfaces the error immediately.

use std::time::Duration;

/// Failure of a single `generate` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The call exceeded its deadline.
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached, was overloaded, or returned 5xx/429.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the body could not be interpreted.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// The backend refused the request (auth, bad request). Never retried.
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether the gateway should retry the call after a backoff.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Classify a non-success HTTP status returned by a backend.
    pub fn from_status(backend: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("{backend} returned {status}: {body}");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::Unavailable(message)
        } else {
            Self::Rejected(message)
        }
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn from_transport(backend: &str, err: &reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(format!("{backend} response parse failed: {err}"))
        } else if err.is_builder() {
            Self::Rejected(format!("{backend} request could not be built: {err}"))
        } else {
            Self::Unavailable(format!("{backend} request failed: {err}"))
        }
    }
}

/// Errors raised while configuring the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),
}
