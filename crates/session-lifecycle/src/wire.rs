//! Response envelope shared by the backend's JSON endpoints.

use serde::Deserialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// `{ "isSuccess": bool, "message": string, "value": ... }`
///
/// Every field is optional; endpoints differ in what they fill in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope {
    #[serde(default)]
    pub is_success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl ApiEnvelope {
    /// Read an envelope out of an arbitrary body. Non-objects yield an empty
    /// envelope.
    pub fn from_value(body: &Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_default()
    }

    pub fn succeeded(&self) -> bool {
        self.is_success != Some(false)
    }
}

/// Loggable stand-in for a response body: its length and a digest, never the
/// content (bodies may carry tokens).
pub fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}
