//! Session and registry errors

use crate::core::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by dock sessions and the registry.
///
/// Cloneable so one failure can be delivered to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DockError {
    /// No transport could be resolved or opened for the key
    #[error("Transport unavailable for {key}: {reason}")]
    TransportUnavailable {
        /// Transport key
        key: String,
        /// Underlying cause
        reason: String,
    },

    /// The dock did not report a full identity in time
    #[error("Dock on {key} did not identify within {timeout_ms} ms")]
    IdentityTimeout {
        /// Transport key
        key: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// I/O error or abrupt close while connected
    #[error("Transport fault: {0}")]
    TransportFault(String),

    /// Command issued before the dock identified
    #[error("Dock is not identified")]
    NotIdentified,

    /// Channel outside 1..=8
    #[error("Invalid channel {0}, expected 1-8")]
    InvalidChannel(u32),

    /// The session has shut down
    #[error("Session closed")]
    SessionClosed,
}

impl DockError {
    /// Build a [`DockError::TransportUnavailable`] from a transport error
    pub fn unavailable(key: &str, error: &TransportError) -> Self {
        Self::TransportUnavailable {
            key: key.to_string(),
            reason: error.to_string(),
        }
    }

    /// Whether the session keeps reconnecting after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransportFault(_))
    }
}
