//! Live push channel for the TV client.
//!
//! [`PushChannel`] keeps one websocket subscription open per authenticated
//! session and turns inbound frames into [`PushEvent::Play`] events. Frame
//! routing lives in [`extract`] as pure functions.

mod backoff;
mod channel;
mod error;
pub mod extract;
mod sources;

pub use backoff::ReconnectBackoff;
pub use channel::{
    PushChannel, PushConfig, PushEvent, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RENEWAL_INTERVAL,
    GRAPHQL_WS_PROTOCOL,
};
pub use error::{PushError, PushResult};
pub use extract::PushRoute;
pub use sources::{CollectionResolver, SubscriptionSource};
