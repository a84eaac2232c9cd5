//! Session record, token set, and grant decoding.

use crate::{SessionError, SessionResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// `expiresIn` values above this are already milliseconds.
const EXPIRES_IN_MILLIS_THRESHOLD: f64 = 100_000.0;

/// Access credential plus what is needed to renew it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute expiry. Never stored in the past; `None` when unknown.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at: expires_at.filter(|at| *at > now),
        }
    }

    /// Time left before expiry, zero once passed. `None` when unknown.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Whether the token has `threshold` or less left. Unknown expiry counts
    /// as fresh.
    pub fn expires_within(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.remaining(now)
            .is_some_and(|remaining| remaining <= threshold)
    }
}

/// The persisted session: tokens plus whatever else the provider returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub tokens: TokenSet,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Session {
    /// Build a session from a sign-in grant.
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> SessionResult<Self> {
        let expires_at = grant.expires_at(now);
        let access_token = grant.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            SessionError::InvalidResponse("grant is missing an access token".to_string())
        })?;

        Ok(Self {
            tokens: TokenSet::new(access_token, grant.refresh_token, expires_at, now),
            metadata: grant.extra,
        })
    }

    /// Apply a refresh grant on top of this session. The previous refresh
    /// token is kept when the grant does not rotate it.
    pub fn refreshed(&self, grant: TokenGrant, now: DateTime<Utc>) -> SessionResult<Self> {
        let mut next = Session::from_grant(grant, now)?;
        if next.tokens.refresh_token.is_none() {
            next.tokens.refresh_token = self.tokens.refresh_token.clone();
        }

        let mut metadata = self.metadata.clone();
        metadata.extend(next.metadata);
        next.metadata = metadata;
        Ok(next)
    }
}

/// Token payload returned by sign-in, pairing, and refresh endpoints.
///
/// Accepts both camelCase and snake_case field names. Unknown fields are kept
/// as session metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(default, alias = "access_token")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Seconds, or milliseconds when above 100 000.
    #[serde(default, alias = "expires_in")]
    pub expires_in: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenGrant {
    /// Grant with just an access and refresh token.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
            ..Self::default()
        }
    }

    pub fn with_expires_in(mut self, expires_in: f64) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Absolute expiry: explicit TTL first, then the JWT `exp` claim.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from_ttl = self
            .expires_in
            .filter(|raw| raw.is_finite() && *raw > 0.0)
            .and_then(|raw| {
                let millis = if raw > EXPIRES_IN_MILLIS_THRESHOLD {
                    raw
                } else {
                    raw * 1000.0
                };
                // Out-of-range TTLs count as unknown.
                TimeDelta::try_milliseconds(millis as i64)
                    .and_then(|ttl| now.checked_add_signed(ttl))
            });

        from_ttl
            .or_else(|| self.access_token.as_deref().and_then(decode_jwt_expiry))
            .filter(|at| *at > now)
    }
}

/// Read the `exp` claim (seconds since epoch) from a JWT without verifying it.
pub fn decode_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let secs = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(secs, 0)
}
