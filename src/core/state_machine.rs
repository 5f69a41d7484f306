//! Dock session state machine
//!
//! Tracks the lifecycle of one dock link and rejects transitions the session
//! loop should never make. Every accepted transition is kept in a bounded
//! history for diagnostics.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_HISTORY: usize = 100;

/// Dock session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DockState {
    /// No link open
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Link open, waiting for all four identity fields
    AwaitingIdentity,
    /// Identified; module traffic is dispatched
    Ready,
    /// Waiting out the backoff before opening the link again
    Reconnecting,
    /// Stopping the link for good
    Disconnecting,
}

impl DockState {
    /// Check if commands may be sent
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the link is open
    pub fn is_link_open(&self) -> bool {
        matches!(self, Self::AwaitingIdentity | Self::Ready)
    }

    /// Status shown to subscribers, if this state has one
    pub fn link_status(&self) -> Option<LinkStatus> {
        match self {
            Self::Ready => Some(LinkStatus::Connected),
            Self::Disconnected => Some(LinkStatus::Disconnected),
            Self::Reconnecting => Some(LinkStatus::Reconnecting),
            _ => None,
        }
    }
}

impl fmt::Display for DockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingIdentity => "awaiting identity",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Coarse link status for indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Dock identified and usable
    Connected,
    /// Link down
    Disconnected,
    /// Link down, another attempt is scheduled
    Reconnecting,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Why the link went down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The last subscriber left and the grace period ran out
    Released,
    /// Explicit shutdown
    Shutdown,
    /// The transport could not be opened
    OpenFailed(String),
    /// The dock did not identify in time
    IdentityTimeout,
    /// I/O error or remote close
    TransportFault(String),
}

/// Recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: DockState,
    /// New state
    pub to: DockState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Dock session state machine
#[derive(Debug)]
pub struct DockStateMachine {
    state: DockState,
    history: Vec<StateTransition>,
    reconnect_attempt: u32,
    was_ready: bool,
    disconnect_reason: Option<DisconnectReason>,
}

impl Default for DockStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DockStateMachine {
    /// Create a new state machine
    pub fn new() -> Self {
        Self {
            state: DockState::Disconnected,
            history: Vec::new(),
            reconnect_attempt: 0,
            was_ready: false,
            disconnect_reason: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DockState {
        self.state
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Consecutive reconnect attempts since the dock was last ready
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Whether the dock has identified at least once on this session
    pub fn was_ready(&self) -> bool {
        self.was_ready
    }

    /// Get disconnect reason
    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        self.disconnect_reason.as_ref()
    }

    /// Set disconnect reason
    pub fn set_disconnect_reason(&mut self, reason: DisconnectReason) {
        self.disconnect_reason = Some(reason);
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: DockState, reason: Option<&str>) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!("Invalid transition from {} to {}", self.state, new_state));
        }

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        self.state = new_state;

        match new_state {
            DockState::Reconnecting => self.reconnect_attempt += 1,
            DockState::Ready => {
                self.reconnect_attempt = 0;
                self.was_ready = true;
                self.disconnect_reason = None;
            }
            _ => {}
        }

        Ok(())
    }

    fn is_valid_transition(&self, new_state: DockState) -> bool {
        use DockState::*;

        match (self.state, new_state) {
            (Disconnected, Connecting | Reconnecting) => true,
            (Connecting, AwaitingIdentity | Disconnected) => true,
            (AwaitingIdentity, Ready | Disconnected | Disconnecting) => true,
            (Ready, Disconnected | Disconnecting) => true,
            (Reconnecting, Connecting | Disconnected) => true,
            (Disconnecting, Disconnected) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_path() {
        let mut sm = DockStateMachine::new();
        assert_eq!(sm.state(), DockState::Disconnected);

        sm.transition(DockState::Connecting, Some("open")).unwrap();
        sm.transition(DockState::AwaitingIdentity, None).unwrap();
        assert!(sm.state().is_link_open());
        assert!(!sm.state().can_send());

        sm.transition(DockState::Ready, Some("identified")).unwrap();
        assert!(sm.state().can_send());
        assert!(sm.was_ready());
        assert_eq!(sm.history().len(), 3);
        assert_eq!(sm.history()[2].reason.as_deref(), Some("identified"));
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = DockStateMachine::new();
        assert!(sm.transition(DockState::Ready, None).is_err());

        sm.transition(DockState::Connecting, None).unwrap();
        sm.transition(DockState::AwaitingIdentity, None).unwrap();
        assert!(sm.transition(DockState::Reconnecting, None).is_err());
    }

    #[test]
    fn test_reconnection_counting() {
        let mut sm = DockStateMachine::new();
        sm.transition(DockState::Connecting, None).unwrap();
        sm.transition(DockState::AwaitingIdentity, None).unwrap();
        sm.transition(DockState::Ready, None).unwrap();

        sm.transition(DockState::Disconnected, Some("eof")).unwrap();
        sm.transition(DockState::Reconnecting, None).unwrap();
        assert_eq!(sm.reconnect_attempt(), 1);

        sm.transition(DockState::Connecting, None).unwrap();
        sm.transition(DockState::Disconnected, Some("open failed")).unwrap();
        sm.transition(DockState::Reconnecting, None).unwrap();
        assert_eq!(sm.reconnect_attempt(), 2);

        sm.transition(DockState::Connecting, None).unwrap();
        sm.transition(DockState::AwaitingIdentity, None).unwrap();
        sm.transition(DockState::Ready, None).unwrap();
        assert_eq!(sm.reconnect_attempt(), 0);
    }

    #[test]
    fn test_link_status_mapping() {
        assert_eq!(DockState::Ready.link_status(), Some(LinkStatus::Connected));
        assert_eq!(DockState::Reconnecting.link_status(), Some(LinkStatus::Reconnecting));
        assert_eq!(DockState::AwaitingIdentity.link_status(), None);
        assert_eq!(LinkStatus::Reconnecting.to_string(), "reconnecting");
    }
}
