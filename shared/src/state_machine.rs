//! Connection State Machine
//!
//! Defines valid lifecycle transitions for a single live connection.

use std::fmt;

/// Lifecycle state of the live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection attempt was requested
    ConnectRequested,
    /// The transport handshake completed
    ConnectSucceeded,
    /// The transport could not be opened
    ConnectFailed,
    /// The peer dropped or closed an established transport
    PeerClosed,
    /// The application asked to close
    CloseRequested,
    /// Forced reconnect: drop whatever is in flight
    ResetRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ConnectionState),
    /// Event is a harmless no-op in the current state
    Ignored {
        state: ConnectionState,
        event: LinkEvent,
    },
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// The lifecycle state machine for one live connection
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        use ConnectionState::*;
        use LinkEvent::*;

        let next = match (self.current_state, event) {
            // Reset always lands in Disconnected
            (_, ResetRequested) => Some(Disconnected),

            (Disconnected | Closing, ConnectRequested) => Some(Connecting),
            (Connecting | Connected, ConnectRequested) => None,

            (Connecting, ConnectSucceeded) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Disconnected),
            (Connected, PeerClosed) => Some(Disconnected),

            (Disconnected | Connecting | Connected, CloseRequested) => Some(Closing),
            (Closing, CloseRequested) => None,

            // Late transport results after close
            (Closing, ConnectSucceeded | ConnectFailed | PeerClosed) => None,

            // Already down
            (Disconnected, PeerClosed) => None,

            (from, event) => return TransitionResult::Invalid { from, event },
        };

        match next {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Ignored {
                state: self.current_state,
                event,
            },
        }
    }
}
