//! Events published by the token lifecycle manager.

use crate::SessionError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Refresh progress, for observers such as the push channel or a status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RefreshStarted,
    Refreshed {
        expires_at: Option<DateTime<Utc>>,
    },
    RefreshFailed {
        error: String,
        transient: bool,
    },
    RenewalScheduled {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    LoggedOut,
}

impl LifecycleEvent {
    pub(crate) fn refresh_failed(error: &SessionError) -> Self {
        LifecycleEvent::RefreshFailed {
            error: error.to_string(),
            transient: error.is_transient(),
        }
    }
}

/// Message for a toast/notification surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNotice {
    pub title: String,
    pub detail: String,
}

impl UserNotice {
    pub fn session_expired() -> Self {
        Self {
            title: "Session expired".to_string(),
            detail: "Please log in again.".to_string(),
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
