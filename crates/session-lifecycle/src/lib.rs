//! Authentication session lifecycle for the TV client.
//!
//! This crate owns the access/refresh token pair and everything that keeps it
//! alive:
//! - [`TokenLifecycleManager`] hands out valid tokens, runs single-flight
//!   refreshes, schedules proactive renewal, and performs forced logout
//! - [`SessionStateHandle`] broadcasts authenticated/unauthenticated changes
//!   with an epoch per session
//! - [`IdentityClient`] talks to the backend's sign-in, pairing, and refresh
//!   endpoints

mod error;
mod events;
mod identity;
mod manager;
mod session_state;
mod timer;
mod token;
mod token_fsm;
pub mod wire;

pub use error::{ProviderError, ProviderResult, SessionError, SessionResult};
pub use events::{LifecycleEvent, UserNotice};
pub use identity::{DeviceDescriptor, IdentityClient, IdentityProvider, TvPairingRequest};
pub use manager::{
    renewal_delay, LifecycleConfig, TokenLifecycleManager, LIVENESS_TOKEN_THRESHOLD,
    REQUEST_TOKEN_THRESHOLD,
};
pub use session_state::{SessionState, SessionStateHandle};
pub use timer::TimerSlot;
pub use token::{decode_jwt_expiry, Session, TokenGrant, TokenSet};
pub use token_fsm::{TokenMachine, TokenMachineInput, TokenMachineState};
