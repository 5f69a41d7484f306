//! Transport layer for dock connections
//!
//! Supports:
//! - Serial ports (USB CDC docks)
//! - Helper subprocesses speaking the dock protocol on stdin/stdout
//! - In-memory simulated docks for tests and demos
//!
//! A transport only moves bytes. Line splitting, identification and module
//! bookkeeping happen in the session that owns it.

mod process;
mod serial;
mod simulated;

pub use process::{ProcessConfig, ProcessTransport};
pub use serial::{list_ports, is_flotilla_dock, SerialConfig, SerialTransport, FLOTILLA_PID, FLOTILLA_VID};
pub use simulated::{DockHarness, DockProfile, SimulatedDock};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK_SIZE: usize = 4096;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// Child process pipes
    Process,
    /// In-memory simulated dock
    Simulated,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Process => write!(f, "Process"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Helper process could not be started
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        /// Program that was launched
        program: String,
        /// Underlying spawn error
        source: std::io::Error,
    },

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Notification delivered by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of bytes arrived. May hold several lines or a partial one.
    Data(Bytes),
    /// The link reported an error. No further data will follow.
    Error(String),
    /// The link was closed by the other end.
    Closed,
}

/// Duplex byte channel to a dock.
///
/// A transport can be opened again after it has been closed, which is how
/// sessions reconnect without asking the connector for a new handle.
#[async_trait]
pub trait LineTransport: Send {
    /// Open the underlying link
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Write bytes to the link. Does not wait for a reply.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next notification.
    ///
    /// Must be cancel safe: it is polled inside `select!` alongside timers.
    /// Returns [`TransportEvent::Closed`] when the link is not open.
    async fn next_event(&mut self) -> TransportEvent;

    /// Forcibly close the link
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the far end understands the `stop` command before being closed
    fn supports_stop(&self) -> bool {
        false
    }

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;
}

/// Resolves a transport key (for example a port name) into a transport.
///
/// Resolution only builds the handle; the link is opened by the session.
pub trait TransportConnector: Send + Sync {
    /// Build a transport for `key`
    fn connect(&self, key: &str) -> Result<Box<dyn LineTransport>, TransportError>;
}

impl<F> TransportConnector for F
where
    F: Fn(&str) -> Result<Box<dyn LineTransport>, TransportError> + Send + Sync,
{
    fn connect(&self, key: &str) -> Result<Box<dyn LineTransport>, TransportError> {
        self(key)
    }
}

/// Connector treating every key as a serial port name
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    /// Create a connector opening ports at `baud_rate`
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(serial::DEFAULT_BAUD_RATE)
    }
}

impl TransportConnector for SerialConnector {
    fn connect(&self, key: &str) -> Result<Box<dyn LineTransport>, TransportError> {
        if key.trim().is_empty() {
            return Err(TransportError::PortNotFound(key.to_string()));
        }
        Ok(Box::new(SerialTransport::new(SerialConfig::new(key, self.baud_rate))))
    }
}

/// Connector treating every key as a helper program path
#[derive(Debug, Clone, Default)]
pub struct ProcessConnector {
    args: Vec<String>,
}

impl ProcessConnector {
    /// Create a connector passing `args` to every spawned program
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl TransportConnector for ProcessConnector {
    fn connect(&self, key: &str) -> Result<Box<dyn LineTransport>, TransportError> {
        let config = ProcessConfig::new(key).args(self.args.clone());
        Ok(Box::new(ProcessTransport::new(config)))
    }
}

/// Shared connector handle
pub type SharedConnector = Arc<dyn TransportConnector>;

/// Pump an async reader into transport events until EOF or error.
pub(crate) fn spawn_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<TransportEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => {
                    let _ = tx.send(TransportEvent::Closed);
                    break;
                }
                Ok(n) => {
                    if tx.send(TransportEvent::Data(Bytes::copy_from_slice(&buffer[..n]))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    })
}
