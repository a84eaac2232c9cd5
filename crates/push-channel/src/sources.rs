//! Collaborators the push channel calls over HTTP.

use crate::{PushError, PushResult};
use async_trait::async_trait;
use http_gateway::{
    media_links, ApiClient, GatewayError, SubscriptionDescriptor, DEFAULT_COLLECTION_LIMIT,
};

/// Hands out the endpoint and opening frame for one subscription.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn request_subscription(&self, channel: &str) -> PushResult<SubscriptionDescriptor>;
}

/// Turns a pushed collection id into playable media references.
#[async_trait]
pub trait CollectionResolver: Send + Sync {
    async fn resolve_collection(&self, collection_id: &str) -> PushResult<Vec<String>>;
}

#[async_trait]
impl SubscriptionSource for ApiClient {
    async fn request_subscription(&self, channel: &str) -> PushResult<SubscriptionDescriptor> {
        self.request_push_subscription(channel)
            .await
            .map_err(subscription_error)
    }
}

/// Failures a later attempt may clear stay retryable; refusals do not.
fn subscription_error(err: GatewayError) -> PushError {
    if err.is_transient() {
        PushError::Subscription(err.to_string())
    } else {
        PushError::SubscriptionRefused(err.to_string())
    }
}

#[async_trait]
impl CollectionResolver for ApiClient {
    async fn resolve_collection(&self, collection_id: &str) -> PushResult<Vec<String>> {
        let items = self
            .fetch_collection(collection_id, 1, DEFAULT_COLLECTION_LIMIT)
            .await
            .map_err(|e| PushError::Resolve {
                collection_id: collection_id.to_string(),
                message: e.to_string(),
            })?;
        Ok(media_links(&items))
    }
}
