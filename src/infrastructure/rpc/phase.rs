//! Connection lifecycle state machine.
//!
//! ```text
//! Disconnected --Dial--> Connecting --Handshake--> Authenticating --Authenticated--> Ready
//!                                   \--Handshake (no credential)------------------> Ready
//! any --Fail--> Disconnected
//! ```

use std::fmt;

use crate::domain::ports::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A new transport is being opened.
    Dial,
    /// The backend acknowledged the protocol handshake.
    Handshake { credential: bool },
    /// The login call returned `true`.
    Authenticated,
    /// Any transport, handshake or login failure.
    Fail,
}

impl Phase {
    /// Apply an event, rejecting transitions the lifecycle does not allow.
    pub fn apply(self, event: PhaseEvent) -> Result<Phase, BackendError> {
        use Phase::*;
        use PhaseEvent::*;

        match (self, event) {
            (_, Fail) => Ok(Disconnected),
            (Disconnected, Dial) => Ok(Connecting),
            (Connecting, Handshake { credential: true }) => Ok(Authenticating),
            (Connecting, Handshake { credential: false }) => Ok(Ready),
            (Authenticating, Authenticated) => Ok(Ready),
            (from, event) => Err(BackendError::Protocol(format!(
                "invalid connection transition from {from} on {event:?}"
            ))),
        }
    }

    pub fn is_ready(self) -> bool {
        self == Phase::Ready
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Authenticating => "authenticating",
            Phase::Ready => "ready",
        };
        f.write_str(name)
    }
}
