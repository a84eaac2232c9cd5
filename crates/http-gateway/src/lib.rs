//! Authenticated HTTP access to the PixlMe API.
//!
//! [`HttpGateway`] attaches the session's bearer token to every call and owns
//! the single refresh-and-retry on authentication failure. [`ApiClient`] puts
//! typed endpoints on top of it.

mod api;
mod error;
mod gateway;

pub use api::{
    media_links, ApiClient, CollectionItem, CollectionSummary, DeviceRegistration, ImageRef,
    SubscriptionDescriptor, DEFAULT_COLLECTION_LIMIT,
};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{is_auth_failure, ApiRequest, HttpGateway, RawResponse};
