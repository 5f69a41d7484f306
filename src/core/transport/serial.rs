//! Serial port transport implementation

use super::{spawn_reader, LineTransport, TransportError, TransportEvent, TransportType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

/// USB vendor ID of the Flotilla dock
pub const FLOTILLA_VID: u16 = 0x16d0;
/// USB product ID of the Flotilla dock
pub const FLOTILLA_PID: u16 = 0x08c3;

pub(crate) const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyACM0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a new serial configuration
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", DEFAULT_BAUD_RATE)
    }
}

/// Serial port transport (8N1, no flow control)
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<WriteHalf<SerialStream>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            events: None,
            reader: None,
        }
    }

    fn map_open_error(&self, e: tokio_serial::Error) -> TransportError {
        match e.kind() {
            tokio_serial::ErrorKind::NoDevice => TransportError::PortNotFound(self.config.port.clone()),
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(self.config.port.clone())
            }
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(self.config.port.clone())
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        }
    }
}

#[async_trait]
impl LineTransport for SerialTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.close().await?;

        let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| self.map_open_error(e))?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        self.reader = Some(spawn_reader(read_half, tx));
        self.writer = Some(write_half);
        self.events = Some(rx);

        debug!(port = %self.config.port, baud = self.config.baud_rate, "serial port opened");
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Closed),
            None => TransportEvent::Closed,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events = None;
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.config.port, self.config.baud_rate)
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

/// Check whether a port reports the Flotilla dock USB identifiers
pub fn is_flotilla_dock(info: &serialport::SerialPortInfo) -> bool {
    match &info.port_type {
        serialport::SerialPortType::UsbPort(usb) => is_flotilla_ids(usb.vid, usb.pid),
        _ => false,
    }
}

fn is_flotilla_ids(vid: u16, pid: u16) -> bool {
    vid == FLOTILLA_VID && pid == FLOTILLA_PID
}
