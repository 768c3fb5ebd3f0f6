//! Broker link state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                                   |  ^
//!                         link lost v  | connack
//!                               Reconnecting
//! ```
//!
//! `Reconnecting` is only entered from `Connected`; subscriptions survive it.

use std::fmt;

/// Connection state of a broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Events that drive link state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller asked for a session
    ConnectRequested,
    /// Broker accepted the session
    ConnAckReceived,
    /// Initial session attempt failed
    ConnectFailed,
    /// An established session dropped unexpectedly
    LinkLost,
    /// Caller asked to tear the session down
    DisconnectRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed)
    Success(LinkState),
    /// Transition was invalid from the current state
    Invalid { from: LinkState, event: LinkEvent },
}

/// Tracks the link state and how many reconnect attempts are in progress
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: LinkState,
    reconnect_attempts: u32,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.current_state
    }

    /// Consecutive failed attempts since the link was last connected
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match self.next_state(&event) {
            Some(state) => {
                match (&event, state) {
                    (LinkEvent::ConnAckReceived, _) | (LinkEvent::DisconnectRequested, _) => {
                        self.reconnect_attempts = 0;
                    }
                    (_, LinkState::Reconnecting) => {
                        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                    }
                    _ => {}
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn next_state(&self, event: &LinkEvent) -> Option<LinkState> {
        use LinkEvent::*;
        use LinkState::*;

        match (self.current_state, event) {
            (_, DisconnectRequested) => Some(Disconnected),

            (Disconnected, ConnectRequested) => Some(Connecting),

            (Connecting, ConnAckReceived) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Disconnected),

            (Connected, LinkLost) => Some(Reconnecting),

            (Reconnecting, ConnAckReceived) => Some(Connected),
            (Reconnecting, LinkLost | ConnectFailed) => Some(Reconnecting),

            _ => None,
        }
    }
}
