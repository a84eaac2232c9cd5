//! Request/response pipeline around the outbound HTTP client.

use crate::{GatewayError, GatewayResult};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use session_lifecycle::wire::summarize_response_body;
use session_lifecycle::{SessionError, TokenLifecycleManager, REQUEST_TOKEN_THRESHOLD};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Statuses that mean "the token is no good" on protected endpoints.
const AUTH_FAILURE_STATUSES: [u16; 3] = [401, 403, 500];

/// Embedded statuses that mean the same inside a 200 body.
const EMBEDDED_AUTH_FAILURE_STATUSES: [i64; 2] = [401, 403];

const AUTH_FAILED_MESSAGE: &str = "Authentication failed.";

/// A protected API call. Cloned for the retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            segments: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// `path` is relative to the API base URL, e.g. `api/collection/byUser`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        }
    }

    /// Append one path segment, percent-encoded.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    fn url(&self, base: &Url) -> GatewayResult<Url> {
        let mut url = base.join(&self.path)?;
        if !self.segments.is_empty() {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GatewayError::InvalidUrl(format!("{base} cannot be a base")))?;
            path.pop_if_empty();
            for segment in &self.segments {
                path.push(segment);
            }
        }
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}

/// Status and body text of one attempt.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Whether a response is an authentication failure: a 401/403/500 status,
/// or a 2xx whose JSON body reports 401/403 or "Authentication failed.".
pub fn is_auth_failure(response: &RawResponse) -> bool {
    if AUTH_FAILURE_STATUSES.contains(&response.status.as_u16()) {
        return true;
    }
    if !response.status.is_success() {
        return false;
    }

    let Ok(Value::Object(body)) = serde_json::from_str::<Value>(&response.body) else {
        return false;
    };
    let embedded_status = ["statusCode", "StatusCode", "status"]
        .iter()
        .find_map(|key| body.get(*key).filter(|value| !value.is_null()));
    if embedded_status
        .and_then(Value::as_i64)
        .is_some_and(|status| EMBEDDED_AUTH_FAILURE_STATUSES.contains(&status))
    {
        return true;
    }
    body.get("message").and_then(Value::as_str) == Some(AUTH_FAILED_MESSAGE)
}

/// Authenticated HTTP gateway.
///
/// Cloning shares the connection pool and the session.
#[derive(Clone)]
pub struct HttpGateway {
    http_client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
    sessions: TokenLifecycleManager,
}

impl HttpGateway {
    pub fn new(base_url: Url, request_timeout: Duration, sessions: TokenLifecycleManager) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, request_timeout, sessions)
    }

    pub fn with_client(
        http_client: reqwest::Client,
        base_url: Url,
        request_timeout: Duration,
        sessions: TokenLifecycleManager,
    ) -> Self {
        Self {
            http_client,
            base_url,
            request_timeout,
            sessions,
        }
    }

    pub fn sessions(&self) -> &TokenLifecycleManager {
        &self.sessions
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send `request` with the session token and return the decoded JSON body.
    ///
    /// An authentication failure triggers one refresh and one resend. A
    /// second failure, or a failed refresh, clears the session and returns
    /// [`GatewayError::Unauthenticated`].
    pub async fn send(&self, request: &ApiRequest) -> GatewayResult<Value> {
        let url = request.url(&self.base_url)?;
        let token = self.request_token().await?;

        let first = self.dispatch(request, &url, &token).await?;
        if !is_auth_failure(&first) {
            return decode(first);
        }

        warn!(
            url = %url,
            status = first.status.as_u16(),
            "Authentication failure, refreshing and retrying once"
        );
        let token = match self.sessions.refresh().await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Refresh failed, logging out");
                self.sessions.force_logout(false);
                return Err(GatewayError::Unauthenticated);
            }
        };

        let retry = self.dispatch(request, &url, &token).await?;
        if is_auth_failure(&retry) {
            warn!(url = %url, status = retry.status.as_u16(), "Authentication failure after retry, logging out");
            self.sessions.force_logout(false);
            return Err(GatewayError::Unauthenticated);
        }
        decode(retry)
    }

    /// Token for a new request. A failed proactive refresh falls back to the
    /// stored token and lets the response decide.
    async fn request_token(&self) -> GatewayResult<String> {
        match self.sessions.get_valid_token(REQUEST_TOKEN_THRESHOLD).await {
            Ok(token) => Ok(token),
            Err(SessionError::NoSession) => Err(GatewayError::Unauthenticated),
            Err(err) => {
                debug!(error = %err, "Proactive refresh failed, using stored token");
                self.sessions
                    .current_token()
                    .ok()
                    .flatten()
                    .ok_or(GatewayError::Unauthenticated)
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: &str,
    ) -> GatewayResult<RawResponse> {
        debug!(method = %request.method, url = %url, "API request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), url.clone())
            .bearer_auth(token)
            .timeout(self.request_timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status();
        let body = response.text().await.map_err(network_error)?;
        Ok(RawResponse { status, body })
    }
}

fn network_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        info!("API request timed out");
    }
    GatewayError::NetworkUnavailable(err.to_string())
}

fn decode(response: RawResponse) -> GatewayResult<Value> {
    if !response.status.is_success() {
        let body = summarize_response_body(&response.body);
        warn!(status = response.status.as_u16(), body = %body, "API request failed");
        return Err(GatewayError::Status {
            status: response.status.as_u16(),
            body,
        });
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|e| GatewayError::Decode(e.to_string()))
}
