//! # Flotilla Core Library
//!
//! Host-side driver for Pimoroni Flotilla docks. A dock multiplexes up to
//! eight sensor and output modules over one line-oriented serial link.
//!
//! ## Features
//!
//! - Serial, helper-process and simulated transports
//! - Dock identification, module enumeration and automatic reconnects
//! - Decoding for every sensor module, generators for motor, number,
//!   matrix and rainbow outputs
//! - One shared session per port with per-channel subscriptions
//! - CLI with exit codes and JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use flotilla_core::{DockEvent, DockRegistry, EventFilter, SerialConnector, SessionConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = DockRegistry::new(Arc::new(SerialConnector::default()), SessionConfig::default());
//!
//!     registry.subscribe("/dev/ttyACM0", 1, EventFilter::readings(), Arc::new(|event: &DockEvent| {
//!         if let DockEvent::Updated(reading) = event {
//!             println!("{:?}", reading.fields);
//!         }
//!     }))?;
//!
//!     let dock = registry.acquire("/dev/ttyACM0").await?;
//!     dock.motor(2).set_speed(40)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{ConfigError, DockSettings};
pub use crate::core::error::DockError;
pub use crate::core::identity::DockIdentity;
pub use crate::core::module::{ModuleFields, ModuleReading, ModuleType};
pub use crate::core::registry::{DockRegistry, EventFilter, SubscriptionId};
pub use crate::core::session::{DockEvent, Session, SessionConfig, SessionHandle};
pub use crate::core::state_machine::{DockState, LinkStatus};
pub use crate::core::transport::{
    DockHarness, DockProfile, LineTransport, ProcessConnector, SerialConnector, SharedConnector,
    SimulatedDock, TransportConnector, TransportError, TransportEvent, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
