//! Core module containing the dock functionality
//!
//! This module provides:
//! - Line transports (serial port, helper process, simulated dock)
//! - Line framing and record decoding
//! - Module catalogue and output generators
//! - Session lifecycle with state machine
//! - Session registry with per-channel subscriptions

pub mod codec;
pub mod error;
pub mod identity;
pub mod module;
pub mod registry;
pub mod session;
pub mod state_machine;
pub mod transport;

pub use error::DockError;
pub use registry::DockRegistry;
pub use session::{DockEvent, Session, SessionConfig, SessionHandle};
