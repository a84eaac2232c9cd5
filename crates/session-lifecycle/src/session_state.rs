//! Process-wide broadcast of the authentication state.
//!
//! Observers hold a `watch::Receiver<SessionState>`; dropping it unsubscribes.
//! Publishing a state equal to the current one does not wake observers.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub authenticated: bool,
    /// A sign-in, restore, or refresh is in progress.
    pub transitioning: bool,
    /// Incremented on every new sign-in or restore. Lets observers tell a
    /// fresh session apart from a refreshed one.
    pub epoch: u64,
}

impl SessionState {
    /// State before the persisted session has been inspected.
    pub const fn booting() -> Self {
        Self {
            authenticated: false,
            transitioning: true,
            epoch: 0,
        }
    }

    pub const fn authenticated(epoch: u64) -> Self {
        Self {
            authenticated: true,
            transitioning: false,
            epoch,
        }
    }

    pub const fn signed_out(epoch: u64) -> Self {
        Self {
            authenticated: false,
            transitioning: false,
            epoch,
        }
    }
}

/// Publishing side of the session state.
#[derive(Debug, Clone)]
pub struct SessionStateHandle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionStateHandle {
    fn default() -> Self {
        Self::new(SessionState::booting())
    }
}

impl SessionStateHandle {
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Publish a new authenticated session and return its epoch.
    pub(crate) fn begin_session(&self) -> u64 {
        let mut epoch = 0;
        self.tx.send_modify(|state| {
            state.epoch += 1;
            state.authenticated = true;
            state.transitioning = false;
            epoch = state.epoch;
        });
        epoch
    }

    /// Publish unauthenticated. Returns whether observers saw a change.
    pub(crate) fn end_session(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if !state.authenticated && !state.transitioning {
                return false;
            }
            state.authenticated = false;
            state.transitioning = false;
            true
        })
    }

    /// Toggle the in-progress flag. Returns whether observers saw a change.
    pub(crate) fn set_transitioning(&self, transitioning: bool) -> bool {
        self.tx.send_if_modified(|state| {
            if state.transitioning == transitioning {
                return false;
            }
            state.transitioning = transitioning;
            true
        })
    }
}
