//! Pure connection state transitions

use crate::error::{AgentError, AgentResult};
use std::fmt;

/// Connection state of an agent's broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Connect requested, waiting for the broker's answer
    Connecting,
    Connected,
    /// Disconnect requested, waiting for the session to close
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        })
    }
}

/// Everything that moves the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTrigger {
    /// `connect()` was called
    ConnectRequested,
    /// The transport rejected the connect request synchronously
    ConnectFailed,
    /// The broker accepted the session
    ConnectAccepted,
    /// The broker refused the session
    ConnectRefused,
    /// `disconnect()` was called
    DisconnectRequested,
    /// The session ended, expectedly or not
    SessionClosed,
}

impl ConnectionState {
    /// Determine the next state (pure function).
    ///
    /// Only a connect request can be refused; every other trigger is absorbed.
    pub fn next(self, trigger: StateTrigger) -> AgentResult<ConnectionState> {
        use ConnectionState::*;
        use StateTrigger::*;

        Ok(match (self, trigger) {
            (Disconnected, ConnectRequested) => Connecting,
            (state, ConnectRequested) => return Err(AgentError::invalid_state(state)),

            (Connecting, ConnectFailed) => Disconnected,
            (state, ConnectFailed) => state,

            // a late acceptance does not cancel a pending disconnect
            (Disconnecting, ConnectAccepted) => Disconnecting,
            (_, ConnectAccepted) => Connected,

            (_, ConnectRefused) => Disconnected,

            (Connecting | Connected, DisconnectRequested) => Disconnecting,
            (state, DisconnectRequested) => state,

            (_, SessionClosed) => Disconnected,
        })
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}
