//! Error types for the push channel.

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum PushError {
    /// Frame carries neither a media list nor a collection id
    #[error("Malformed push payload: {0}")]
    MalformedPushPayload(String),

    #[error("WebSocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("Push socket connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The backend could not be reached for a subscription descriptor
    #[error("Subscription request failed: {0}")]
    Subscription(String),

    /// The backend answered but refused to hand out a descriptor
    #[error("Subscription refused: {0}")]
    SubscriptionRefused(String),

    #[error("Failed to resolve collection {collection_id}: {message}")]
    Resolve {
        collection_id: String,
        message: String,
    },

    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),
}

impl PushError {
    /// Returns true if reconnecting may clear the failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PushError::Socket(_) | PushError::ConnectTimeout(_) | PushError::Subscription(_)
        )
    }
}

/// Result type alias using PushError.
pub type PushResult<T> = Result<T, PushError>;
