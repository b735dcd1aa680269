//! Connection finite-state machine (FSM) states.
//!
//! One enum covers both socket variants: a [`crate::listener::ListenerSocket`]
//! only ever occupies `Closed` and `Listen`, a
//! [`crate::connection::ConnectionSocket`] moves through the rest.
//! Transitions live with the sockets; this module only names the states.
//!
//! ```text
//!  CLOSED ──connect / →START──▶ SYN_SENT ──←START──▶ ESTABLISHED
//!   ▲  │                                              │         │
//!   │  │ listen                     close / →TEARDOWN │         │ ←TEARDOWN
//!   │  ▼                                              ▼         ▼
//!   │ LISTEN                                      FIN_WAIT   CLOSE_WAIT ⟲ close / →TEARDOWN
//!   │                                                 │
//!   └──────────────────────── ←TEARDOWN ──────────────┘
//! ```
//!
//! CLOSE_WAIT has no edge back to CLOSED and there is no TIME_WAIT hold; a
//! teardown received in FIN_WAIT is final.

use std::fmt;

/// All states a socket can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection; initial and terminal state.
    #[default]
    Closed,
    /// Passive socket accepting Start segments from any remote port.
    Listen,
    /// Start sent; waiting for the peer's Start reply.
    SynSent,
    /// Handshake complete.
    Established,
    /// Local side sent Teardown; waiting for the peer's.
    FinWait,
    /// Peer sent Teardown; local close pending or done.
    CloseWait,
}

impl ConnectionState {
    /// `true` while the socket may still hand received bytes to the
    /// application.
    pub fn can_receive(self) -> bool {
        matches!(self, Self::Established | Self::FinWait | Self::CloseWait)
    }

    /// `true` while the application may queue new bytes for sending.
    pub fn can_send(self) -> bool {
        self == Self::Established
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN-SENT",
            Self::Established => "ESTABLISHED",
            Self::FinWait => "FIN-WAIT",
            Self::CloseWait => "CLOSE-WAIT",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }

    #[test]
    fn close_wait_refuses_new_sends() {
        assert!(ConnectionState::Established.can_send());
        assert!(!ConnectionState::CloseWait.can_send());
        assert!(ConnectionState::CloseWait.can_receive());
        assert!(!ConnectionState::SynSent.can_receive());
    }
}
