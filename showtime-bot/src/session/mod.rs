//! Messaging session lifecycle.
//!
//! # States
//!
//! ```text
//!                initialize            pairing              paired
//! Disconnected ───────────▶ Connecting ───────▶ AwaitingPairing ───▶ Authenticated
//!      ▲  ▲                     │  (restored credentials)                 │
//!      │  │                     └─────────────────────────────────────────┤ handshake
//!      │  │ disconnect / probe failure                                    ▼
//!      │  └─────────────────────────────────────────────────────────── Ready
//!      │
//!      │ cool-down          reconnects exhausted / auth failure
//!      └──────────── Failed ◀──────────────────────────────────
//! ```
//!
//! `Failed` after an auth failure is terminal until an explicit restart.
//! `Failed` after exhausting reconnects resets its counter after a cool-down.

mod manager;
mod status;
mod timer;

pub use manager::{SessionCommand, SessionHandle, SessionLifecycleManager, SessionSnapshot};
pub use status::{StatusHub, StatusUpdate};
pub use timer::{ScheduledTask, Scheduler};

use serde::{Deserialize, Serialize};

/// Session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingPairing,
    Authenticated,
    Ready,
    Failed,
}

/// What drives a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initialize,
    PairingChallenge,
    Authenticated,
    HandshakeComplete,
    Disconnect,
    AuthFailure,
    ReconnectAllowed,
    ReconnectRefused,
    CooldownElapsed,
    Restart,
    Shutdown,
}

/// Why the session sits in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Credentials rejected; needs an explicit restart
    AuthRejected,
    /// Reconnect budget spent; retried after the cool-down
    ReconnectsExhausted,
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Check if replies can be sent
    pub const fn is_usable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if a connection attempt is under way
    pub const fn is_establishing(&self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingPairing | Self::Authenticated)
    }

    /// State reached from `self` on `trigger`, or `None` if the trigger does
    /// not apply in this state.
    pub const fn next(self, trigger: Trigger) -> Option<Self> {
        use SessionState::*;
        match (self, trigger) {
            (Disconnected, Trigger::Initialize) => Some(Connecting),
            (Connecting | AwaitingPairing, Trigger::PairingChallenge) => Some(AwaitingPairing),
            (Connecting | AwaitingPairing, Trigger::Authenticated) => Some(Authenticated),
            (Authenticated, Trigger::HandshakeComplete) => Some(Ready),
            (Connecting | AwaitingPairing | Authenticated | Ready, Trigger::Disconnect) => {
                Some(Disconnected)
            }
            (Connecting | AwaitingPairing | Authenticated, Trigger::AuthFailure) => Some(Failed),
            (Disconnected, Trigger::ReconnectAllowed) => Some(Connecting),
            (Disconnected, Trigger::ReconnectRefused) => Some(Failed),
            (Failed, Trigger::CooldownElapsed) => Some(Disconnected),
            (_, Trigger::Restart | Trigger::Shutdown) => Some(Disconnected),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
