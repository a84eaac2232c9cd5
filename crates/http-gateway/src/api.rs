//! Typed PixlMe API endpoints.

use crate::gateway::{ApiRequest, HttpGateway};
use crate::{GatewayError, GatewayResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use session_lifecycle::wire::ApiEnvelope;
use session_lifecycle::DeviceDescriptor;
use tracing::{debug, info};

/// Page size used when resolving a pushed collection id.
pub const DEFAULT_COLLECTION_LIMIT: u32 = 100;

const COLLECTION_PATH: &str = "api/collection";
const USER_COLLECTIONS_PATH: &str = "api/collection/byUser";
const SUBSCRIBE_PATH: &str = "api/streaming/appsync/subscribe/requests";
const REGISTER_DEVICE_PATH: &str = "api/device/register";

/// One entry of a collection page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionItem {
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImageRef {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub thumblink: Option<String>,
}

impl CollectionItem {
    /// Direct media link: `link`, else `image.link`.
    pub fn media_link(&self) -> Option<&str> {
        self.link
            .as_deref()
            .or_else(|| self.image.as_ref().and_then(|image| image.link.as_deref()))
            .filter(|link| !link.is_empty())
    }
}

/// Media links of `items` in order, skipping items without one.
pub fn media_links(items: &[CollectionItem]) -> Vec<String> {
    items
        .iter()
        .filter_map(CollectionItem::media_link)
        .map(str::to_string)
        .collect()
}

/// A collection owned by the signed-in user.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub collection_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where and how to open the push socket.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionDescriptor {
    pub url: String,
    /// First frame to send once the socket is open.
    #[serde(default)]
    pub body: Value,
}

/// Body of `POST /api/device/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    #[serde(flatten)]
    pub device: DeviceDescriptor,
    pub serial_number: String,
}

impl DeviceRegistration {
    pub fn new(device: DeviceDescriptor) -> Self {
        Self {
            serial_number: device.device_identifier.clone(),
            device,
        }
    }
}

/// Typed client over [`HttpGateway`].
#[derive(Clone)]
pub struct ApiClient {
    gateway: HttpGateway,
}

impl ApiClient {
    pub fn new(gateway: HttpGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &HttpGateway {
        &self.gateway
    }

    /// `GET /api/collection/{id}?page&limit`: ordered items of one page.
    pub async fn fetch_collection(
        &self,
        collection_id: &str,
        page: u32,
        limit: u32,
    ) -> GatewayResult<Vec<CollectionItem>> {
        let request = ApiRequest::get(COLLECTION_PATH)
            .segment(collection_id)
            .query("page", page)
            .query("limit", limit);
        let items: Vec<CollectionItem> = decode_list(self.call(&request).await?)?;
        debug!(collection_id, count = items.len(), "Fetched collection page");
        Ok(items)
    }

    /// `GET /api/collection/byUser`
    pub async fn fetch_user_collections(&self) -> GatewayResult<Vec<CollectionSummary>> {
        decode_list(self.call(&ApiRequest::get(USER_COLLECTIONS_PATH)).await?)
    }

    /// Ask the backend for a push subscription on `channel` (the device id).
    pub async fn request_push_subscription(
        &self,
        channel: &str,
    ) -> GatewayResult<SubscriptionDescriptor> {
        let request = ApiRequest::post(SUBSCRIBE_PATH, json!({ "channel": channel }));
        let descriptor: SubscriptionDescriptor = decode(self.call(&request).await?)?;
        if descriptor.url.is_empty() {
            return Err(GatewayError::Api(
                "subscription descriptor has no url".to_string(),
            ));
        }
        info!(channel, "Push subscription granted");
        Ok(descriptor)
    }

    /// `POST /api/device/register`. Returns the backend's `value`.
    pub async fn register_device(&self, registration: &DeviceRegistration) -> GatewayResult<Value> {
        let body = serde_json::to_value(registration)
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let value = self
            .call(&ApiRequest::post(REGISTER_DEVICE_PATH, body))
            .await?;
        info!(
            device_identifier = %registration.device.device_identifier,
            "Device registered"
        );
        Ok(value)
    }

    /// Send through the gateway and unwrap the envelope's `value`. A missing
    /// `value` is JSON null.
    async fn call(&self, request: &ApiRequest) -> GatewayResult<Value> {
        let body = self.gateway.send(request).await?;
        let envelope = ApiEnvelope::from_value(&body);
        if !envelope.succeeded() {
            return Err(GatewayError::Api(
                envelope
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(envelope.value.unwrap_or(Value::Null))
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> GatewayResult<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}

/// Null reads as an empty list.
fn decode_list<T: DeserializeOwned>(value: Value) -> GatewayResult<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    decode(value)
}
