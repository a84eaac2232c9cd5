//! Session and identity-provider error types.

use thiserror::Error;

/// Failure reported by an [`IdentityProvider`](crate::IdentityProvider) call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The backend refused the credential (expired or revoked refresh token,
    /// bad password, unknown pairing code)
    #[error("Rejected by identity provider (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// No response was received
    #[error("Network unavailable: {0}")]
    Network(String),

    /// A status the protocol does not assign a meaning to
    #[error("Unexpected HTTP status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// Response arrived but could not be used
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Session error type.
///
/// Clone-able so a single refresh outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session is stored
    #[error("Not logged in")]
    NoSession,

    /// The stored session cannot be refreshed
    #[error("Session has no refresh token")]
    NoRefreshToken,

    /// The refresh round trip exceeded its deadline
    #[error("Token refresh timed out")]
    RefreshTimeout,

    /// The backend declared the refresh token invalid; the session is gone
    #[error("Token refresh rejected (HTTP {status}): {message}")]
    RefreshRejected { status: u16, message: String },

    /// Sign-in or pairing was refused
    #[error("Sign-in rejected (HTTP {status}): {message}")]
    SignInRejected { status: u16, message: String },

    /// No response from the identity provider
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The identity provider answered with a status outside the protocol
    #[error("Unexpected HTTP status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// The identity provider answered with something unusable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credential store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid state transition in the token FSM
    #[error("Invalid token state transition: {0}")]
    InvalidTransition(String),
}

impl SessionError {
    /// Returns true if the failure may clear up on its own and the session
    /// was kept.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::RefreshTimeout
                | SessionError::NetworkUnavailable(_)
                | SessionError::UnexpectedStatus { .. }
        )
    }

    /// Returns true if the failure ended the session.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SessionError::RefreshRejected { .. })
    }
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { status, message } => {
                SessionError::RefreshRejected { status, message }
            }
            ProviderError::Network(message) => SessionError::NetworkUnavailable(message),
            ProviderError::UnexpectedStatus { status, message } => {
                SessionError::UnexpectedStatus { status, message }
            }
            ProviderError::InvalidResponse(message) => SessionError::InvalidResponse(message),
        }
    }
}

impl SessionError {
    /// Map a sign-in or pairing failure. Unlike a refresh, a refusal here
    /// says nothing about an existing session.
    pub fn from_sign_in(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { status, message } => {
                SessionError::SignInRejected { status, message }
            }
            other => other.into(),
        }
    }
}

impl From<credential_store::StorageError> for SessionError {
    fn from(err: credential_store::StorageError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type alias using ProviderError.
pub type ProviderResult<T> = Result<T, ProviderError>;
