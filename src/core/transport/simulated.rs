//! Simulated dock
//!
//! An in-memory transport paired with a [`DockHarness`]. The harness plays
//! the device side: it scripts incoming lines, injects faults and records
//! every command the session writes. With a [`DockProfile`] installed the
//! simulated dock answers `v` and `e` on its own, like real hardware.

use super::{LineTransport, TransportError, TransportEvent, TransportType};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity and attached modules reported by a simulated dock
#[derive(Debug, Clone, PartialEq)]
pub struct DockProfile {
    /// Firmware version
    pub version: String,
    /// Dock serial number
    pub serial: String,
    /// Stored user name
    pub user: String,
    /// Stored dock name
    pub name: String,
    /// Modules reported on enumeration: (channel, module type, arguments)
    pub modules: Vec<(u8, String, Vec<String>)>,
}

impl Default for DockProfile {
    fn default() -> Self {
        Self {
            version: "1.12".to_string(),
            serial: "0B1F2C3D".to_string(),
            user: "maker".to_string(),
            name: "Workbench".to_string(),
            modules: Vec::new(),
        }
    }
}

impl DockProfile {
    /// Add a module reported on enumeration
    #[must_use]
    pub fn with_module(mut self, channel: u8, module: &str, args: &[&str]) -> Self {
        self.modules.push((
            channel,
            module.to_string(),
            args.iter().map(|a| (*a).to_string()).collect(),
        ));
        self
    }

    fn identity_lines(&self) -> Vec<String> {
        vec![
            format!("# Version: {}", self.version),
            format!("# Serial: {}", self.serial),
            format!("# User: {}", self.user),
            format!("# Dock: {}", self.name),
        ]
    }

    fn enumeration_lines(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|(channel, module, args)| {
                if args.is_empty() {
                    format!("c {channel}/{module}")
                } else {
                    format!("c {channel}/{module} {}", args.join(","))
                }
            })
            .collect()
    }
}

#[derive(Default)]
struct Shared {
    profile: Option<DockProfile>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    writes: Vec<String>,
    opens: usize,
    failing_opens: usize,
    supports_stop: bool,
}

impl Shared {
    fn push(&self, event: TransportEvent) -> bool {
        self.events.as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }

    fn push_line(&self, line: &str) -> bool {
        self.push(TransportEvent::Data(Bytes::from(format!("{line}\r\n"))))
    }
}

/// Transport half of a simulated dock
pub struct SimulatedDock {
    shared: Arc<Mutex<Shared>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    write_tx: mpsc::UnboundedSender<String>,
}

/// Device half of a simulated dock
pub struct DockHarness {
    shared: Arc<Mutex<Shared>>,
    write_rx: mpsc::UnboundedReceiver<String>,
}

impl SimulatedDock {
    /// Create a silent simulated dock; the harness scripts everything
    pub fn new() -> (Self, DockHarness) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                events: None,
                write_tx,
            },
            DockHarness { shared, write_rx },
        )
    }

    /// Create a simulated dock that answers identity and enumeration requests
    pub fn with_profile(profile: DockProfile) -> (Self, DockHarness) {
        let (dock, harness) = Self::new();
        harness.set_profile(Some(profile));
        (dock, harness)
    }
}

#[async_trait]
impl LineTransport for SimulatedDock {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if shared.failing_opens > 0 {
            shared.failing_opens -= 1;
            return Err(TransportError::PortNotFound("simulated".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        shared.events = Some(tx);
        shared.opens += 1;
        self.events = Some(rx);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let shared = self.shared.lock();
        if self.events.is_none() || shared.events.is_none() {
            return Err(TransportError::NotConnected);
        }

        let text = String::from_utf8_lossy(data).to_string();
        let _ = self.write_tx.send(text.clone());

        if let Some(profile) = &shared.profile {
            let replies = match text.trim() {
                "v" => profile.identity_lines(),
                "e" => profile.enumeration_lines(),
                _ => Vec::new(),
            };
            for line in &replies {
                shared.push_line(line);
            }
        }
        drop(shared);

        self.shared.lock().writes.push(text);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Closed),
            None => TransportEvent::Closed,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.events = None;
        self.shared.lock().events = None;
        Ok(())
    }

    fn supports_stop(&self) -> bool {
        self.shared.lock().supports_stop
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Simulated
    }

    fn connection_info(&self) -> String {
        "simulated dock".to_string()
    }
}

impl DockHarness {
    /// Deliver one line (CRLF appended). Returns false when the link is closed.
    pub fn send_line(&self, line: &str) -> bool {
        self.shared.lock().push_line(line)
    }

    /// Deliver a raw chunk exactly as given
    pub fn send_chunk(&self, data: &[u8]) -> bool {
        self.shared
            .lock()
            .push(TransportEvent::Data(Bytes::copy_from_slice(data)))
    }

    /// Report a link error to the session
    pub fn inject_error(&self, message: &str) -> bool {
        self.shared.lock().push(TransportEvent::Error(message.to_string()))
    }

    /// Drop the link as if the cable was pulled
    pub fn disconnect(&self) -> bool {
        let mut shared = self.shared.lock();
        let delivered = shared.push(TransportEvent::Closed);
        shared.events = None;
        delivered
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next_opens(&self, count: usize) {
        self.shared.lock().failing_opens = count;
    }

    /// Install or remove the auto-responding profile
    pub fn set_profile(&self, profile: Option<DockProfile>) {
        self.shared.lock().profile = profile;
    }

    /// Advertise support for the `stop` command
    pub fn set_supports_stop(&self, enabled: bool) {
        self.shared.lock().supports_stop = enabled;
    }

    /// Whether the session currently holds the link open
    pub fn is_open(&self) -> bool {
        self.shared.lock().events.is_some()
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    /// Every command written so far, in order
    pub fn writes(&self) -> Vec<String> {
        self.shared.lock().writes.clone()
    }

    /// Wait for the next command written by the session
    pub async fn next_write(&mut self) -> Option<String> {
        self.write_rx.recv().await
    }
}
