//! Identity provider: the backend endpoints that issue and renew tokens.

use crate::wire::{summarize_response_body, ApiEnvelope};
use crate::{ProviderError, ProviderResult, TokenGrant};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const SIGN_IN_PATH: &str = "api/auth/signin";
const VALIDATE_TV_CODE_PATH: &str = "api/auth/validatetvcode";
const REFRESH_PATH: &str = "api/auth/refresh_token";

/// Statuses on the refresh endpoint that mean the refresh token is dead.
const REFRESH_REJECT_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_REQUEST,
    StatusCode::UNAUTHORIZED,
    StatusCode::INTERNAL_SERVER_ERROR,
];

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Email/password sign-in.
    async fn sign_in(&self, email: &str, password: &str) -> ProviderResult<TokenGrant>;

    /// Exchange an on-screen pairing code for tokens.
    async fn validate_tv_code(&self, request: &TvPairingRequest) -> ProviderResult<TokenGrant>;

    /// Trade a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<TokenGrant>;
}

/// How this TV describes itself to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub device_type: String,
    pub os_type: String,
    pub device_make: String,
    pub device_identifier: String,
    pub device_name: String,
    pub device_metadata: Vec<String>,
}

impl DeviceDescriptor {
    pub fn tv(device_identifier: impl Into<String>, device_name: impl Into<String>) -> Self {
        let device_identifier = device_identifier.into();
        Self {
            device_type: "TV".to_string(),
            os_type: std::env::consts::OS.to_string(),
            device_make: std::env::consts::ARCH.to_string(),
            device_metadata: vec!["model".to_string(), device_identifier.clone()],
            device_identifier,
            device_name: device_name.into(),
        }
    }
}

/// Body of `POST /api/auth/validatetvcode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvPairingRequest {
    #[serde(flatten)]
    pub device: DeviceDescriptor,
    pub code_verifier: String,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// HTTP identity provider.
#[derive(Clone)]
pub struct IdentityClient {
    http_client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl IdentityClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, request_timeout)
    }

    pub fn with_client(
        http_client: reqwest::Client,
        base_url: Url,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            base_url,
            request_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> ProviderResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidResponse(format!("bad endpoint {path}: {e}")))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ProviderResult<(StatusCode, String)> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "identity request");

        let response = self
            .http_client
            .post(url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Sign-in and pairing share one response contract: 2xx with a grant in
    /// `value`, anything else is a rejection.
    async fn exchange<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ProviderResult<TokenGrant> {
        let (status, body) = self.post_json(path, body).await?;
        if !status.is_success() {
            warn!(status = %status, body = %summarize_response_body(&body), path, "sign-in rejected");
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: envelope_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }

        let envelope = parse_envelope(&body)?;
        if !envelope.succeeded() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| "sign-in failed".to_string()),
            });
        }
        grant_from_envelope(envelope)
    }
}

#[async_trait]
impl IdentityProvider for IdentityClient {
    async fn sign_in(&self, email: &str, password: &str) -> ProviderResult<TokenGrant> {
        self.exchange(SIGN_IN_PATH, &SignInRequest { email, password })
            .await
    }

    async fn validate_tv_code(&self, request: &TvPairingRequest) -> ProviderResult<TokenGrant> {
        self.exchange(VALIDATE_TV_CODE_PATH, request).await
    }

    async fn refresh(&self, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let (status, body) = self
            .post_json(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await?;

        if REFRESH_REJECT_STATUSES.contains(&status) {
            warn!(status = %status, body = %summarize_response_body(&body), "token refresh rejected");
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: envelope_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }
        if !status.is_success() {
            warn!(status = %status, body = %summarize_response_body(&body), "token refresh failed");
            return Err(ProviderError::UnexpectedStatus {
                status: status.as_u16(),
                message: envelope_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }

        grant_from_envelope(parse_envelope(&body)?)
    }
}

fn parse_envelope(body: &str) -> ProviderResult<ApiEnvelope> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("body is not JSON: {e}")))?;
    let mut envelope = ApiEnvelope::from_value(&value);
    // Some deployments return the grant at the top level.
    if envelope.value.is_none() && value.is_object() {
        envelope.value = Some(value);
    }
    Ok(envelope)
}

fn grant_from_envelope(envelope: ApiEnvelope) -> ProviderResult<TokenGrant> {
    let value = envelope
        .value
        .ok_or_else(|| ProviderError::InvalidResponse("response has no value".to_string()))?;
    let grant: TokenGrant = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed token grant: {e}")))?;
    if grant.access_token.as_deref().map_or(true, str::is_empty) {
        return Err(ProviderError::InvalidResponse(
            "response carries no access token".to_string(),
        ));
    }
    Ok(grant)
}

fn envelope_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| ApiEnvelope::from_value(&value).message)
        .filter(|message| !message.is_empty())
}
