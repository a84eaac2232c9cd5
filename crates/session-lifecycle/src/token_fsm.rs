//! Token lifecycle state machine using rust-fsm.
//!
//! ```text
//!            SessionEstablished
//! ┌───────────┐ ───────────────► ┌────────┐  RefreshStarted  ┌────────────┐
//! │ LoggedOut │                  │  Idle  │ ───────────────► │ Refreshing │
//! └───────────┘ ◄─────────────── └────────┘ ◄─────────────── └─────┬──────┘
//!       ▲          Logout                    RefreshSucceeded       │
//!       │                                    RefreshFailed          │
//!       └───────────────────────────────────────────────────────────┘
//!                          RefreshRejected / Logout
//! ```
//!
//! `LoggedOut` is left only through a fresh sign-in (`SessionEstablished`).

use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub token_machine(LoggedOut)

    LoggedOut => {
        SessionEstablished => Idle,
        Logout => LoggedOut
    },
    Idle => {
        SessionEstablished => Idle,
        RefreshStarted => Refreshing,
        Logout => LoggedOut
    },
    Refreshing => {
        // A sign-in while a refresh is outstanding supersedes that refresh
        SessionEstablished => Idle,
        RefreshSucceeded => Idle,
        // Timeouts and network failures keep the session
        RefreshFailed => Idle,
        RefreshRejected => LoggedOut,
        Logout => LoggedOut
    }
}

pub use token_machine::Input as TokenMachineInput;
pub use token_machine::State as TokenMachineState;
pub use token_machine::StateMachine as TokenMachine;
