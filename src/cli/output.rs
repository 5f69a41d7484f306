//! Event and port rendering for the CLI

use crate::core::module::ModuleReading;
use crate::core::session::DockEvent;
use crate::core::transport::is_flotilla_dock;
use clap::ValueEnum;
use serde_json::{json, Value};

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Render one session event as a single output line
pub fn format_event(event: &DockEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => event_text(event),
        OutputFormat::Json => event_json(event).to_string(),
    }
}

fn event_text(event: &DockEvent) -> String {
    match event {
        DockEvent::Opened(identity) => format!("opened   {identity}"),
        DockEvent::Updated(reading) => format!("update   {}", reading_text(reading)),
        DockEvent::Found(reading) => format!("found    {}", reading_text(reading)),
        DockEvent::Lost(reading) => format!("lost     {}", reading_text(reading)),
        DockEvent::Info(text) => format!("info     {text}"),
        DockEvent::Error(err) => format!("error    {err}"),
        DockEvent::Status(status) => format!("status   {status}"),
        DockEvent::Closed => "closed".to_string(),
    }
}

fn reading_text(reading: &ModuleReading) -> String {
    let fields = serde_json::to_string(&reading.fields).unwrap_or_default();
    format!("ch{} {} {}", reading.channel, reading.module_type, fields)
}

fn event_json(event: &DockEvent) -> Value {
    match event {
        DockEvent::Opened(identity) => json!({ "event": "opened", "identity": identity }),
        DockEvent::Updated(reading) => json!({ "event": "update", "reading": reading }),
        DockEvent::Found(reading) => json!({ "event": "found", "reading": reading }),
        DockEvent::Lost(reading) => json!({ "event": "lost", "reading": reading }),
        DockEvent::Info(text) => json!({ "event": "info", "message": text }),
        DockEvent::Error(err) => json!({ "event": "error", "message": err.to_string() }),
        DockEvent::Status(status) => json!({ "event": "status", "status": status }),
        DockEvent::Closed => json!({ "event": "closed" }),
    }
}

/// Summarise a serial port for `list-ports`
pub fn describe_port(port: &serialport::SerialPortInfo) -> Value {
    let (vid, pid, product) = match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => (
            Some(format!("{:04x}", usb.vid)),
            Some(format!("{:04x}", usb.pid)),
            usb.product.clone(),
        ),
        _ => (None, None, None),
    };
    json!({
        "name": port.port_name,
        "flotilla": is_flotilla_dock(port),
        "vid": vid,
        "pid": pid,
        "product": product,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DockError;
    use crate::core::module::{ModuleFields, ModuleType};
    use crate::core::state_machine::LinkStatus;

    fn dial(position: i32) -> ModuleReading {
        ModuleReading {
            channel: 3,
            module_type: ModuleType::Dial,
            fields: ModuleFields::Position { position },
        }
    }

    #[test]
    fn text_update_line() {
        let line = format_event(&DockEvent::Updated(dial(512)), OutputFormat::Text);
        assert_eq!(line, r#"update   ch3 dial {"position":512}"#);
    }

    #[test]
    fn json_update_line() {
        let line = format_event(&DockEvent::Updated(dial(7)), OutputFormat::Json);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "update");
        assert_eq!(value["reading"]["channel"], 3);
        assert_eq!(value["reading"]["module_type"], "dial");
        assert_eq!(value["reading"]["fields"]["position"], 7);
    }

    #[test]
    fn json_status_and_error() {
        let status = format_event(&DockEvent::Status(LinkStatus::Reconnecting), OutputFormat::Json);
        assert_eq!(status, r#"{"event":"status","status":"reconnecting"}"#);

        let error = format_event(&DockEvent::Error(DockError::NotIdentified), OutputFormat::Json);
        let value: Value = serde_json::from_str(&error).unwrap();
        assert_eq!(value["event"], "error");
        assert!(value["message"].as_str().is_some());
    }

    #[test]
    fn closed_text() {
        assert_eq!(format_event(&DockEvent::Closed, OutputFormat::Text), "closed");
    }
}
