//! Error types for the API gateway.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No usable session, or authentication failed again after one refresh.
    /// The session has been cleared.
    #[error("Unauthorized. Please login again.")]
    Unauthenticated,

    /// No response was received (connect failure or timeout)
    #[error("Network error: {0}")]
    NetworkUnavailable(String),

    /// Non-success status that is not an authentication failure
    #[error("HTTP {status} ({body})")]
    Status { status: u16, body: String },

    /// Response body is not JSON
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Backend answered with `isSuccess: false`
    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl GatewayError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::NetworkUnavailable(_) => true,
            GatewayError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidUrl(err.to_string())
    }
}

/// Result type alias using GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
