//! Dock line protocol codec
//!
//! The dock speaks newline-terminated ASCII:
//! - `# Field: value` info lines carrying identity and diagnostics
//! - `u`/`c`/`d` command lines describing module updates, connects and disconnects
//!
//! Outgoing commands are single lines terminated by a carriage return.

mod line;
mod record;

pub use line::{DockLineCodec, DEFAULT_MAX_LINE_LENGTH};
pub use record::{decode_line, CommandCode, CommandRecord, InfoRecord, Record};

use crate::core::module::SLOT_COUNT;

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A line exceeded the configured maximum length and was discarded
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command sent from the host to the dock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockCommand {
    /// Ask the dock to report its identity (`v`)
    RequestVersion,
    /// Ask the dock to report every attached module (`e`)
    Enumerate,
    /// Push output values to a channel (`s`)
    Update {
        /// Channel number, 1-indexed
        channel: u8,
        /// Values to push
        values: Vec<i32>,
    },
    /// Ask a helper process to shut down (`stop`)
    Stop,
    /// Arbitrary text
    Raw(String),
}

impl DockCommand {
    /// Wire form of the command, including the trailing CR
    pub fn to_wire(&self) -> String {
        match self {
            Self::RequestVersion => format_command('v'),
            Self::Enumerate => format_command('e'),
            Self::Update { channel, values } => format_update(*channel, values),
            Self::Stop => format_raw("stop"),
            Self::Raw(text) => format_raw(text),
        }
    }
}

/// Format a single-letter command: `code + CR`
pub fn format_command(code: char) -> String {
    format!("{code}\r")
}

/// Format an output update: `s <channel> <v1,v2,...>` + CR
pub fn format_update(channel: u8, values: &[i32]) -> String {
    let joined = values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("s {channel} {joined}\r")
}

/// Format free text as a command line
pub fn format_raw(text: &str) -> String {
    format!("{}\r", text.trim_end_matches(['\r', '\n']))
}

/// Whether `channel` addresses one of the dock's slots
pub fn is_valid_channel(channel: u32) -> bool {
    (1..=SLOT_COUNT as u32).contains(&channel)
}
