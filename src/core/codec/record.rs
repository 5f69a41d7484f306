//! Parsed protocol records

use serde::{Deserialize, Serialize};

/// One decoded protocol line
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// `#`-prefixed line
    Info(InfoRecord),
    /// Module event line
    Command(CommandRecord),
}

/// Content of a `#`-prefixed line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InfoRecord {
    /// `# Version: <float>`
    Version(f64),
    /// `# Serial: <string>`
    Serial(String),
    /// `# User: <string>`
    User(String),
    /// `# Dock: <string>`
    Dock(String),
    /// Any other info text, forwarded verbatim
    Message(String),
}

impl InfoRecord {
    fn parse(body: &str) -> Self {
        let field = |prefix: &str| body.strip_prefix(prefix).map(|v| v.trim().to_string());

        if let Some(value) = field("Version:") {
            // A version that does not parse stays informational only
            return match value.parse::<f64>() {
                Ok(version) if version.is_finite() => Self::Version(version),
                _ => Self::Message(body.to_string()),
            };
        }
        if let Some(value) = field("Serial:") {
            return Self::Serial(value);
        }
        if let Some(value) = field("User:") {
            return Self::User(value);
        }
        if let Some(value) = field("Dock:") {
            return Self::Dock(value);
        }
        Self::Message(body.to_string())
    }
}

/// Command code of a module event line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandCode {
    /// `u`: module reading changed
    Update,
    /// `c`: module attached
    Connected,
    /// `d`: module detached
    Disconnected,
    /// Any other code letter
    Unknown(char),
}

impl From<char> for CommandCode {
    fn from(code: char) -> Self {
        match code {
            'u' => Self::Update,
            'c' => Self::Connected,
            'd' => Self::Disconnected,
            other => Self::Unknown(other),
        }
    }
}

/// A `u`/`c`/`d` line split into tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// Command code
    pub code: CommandCode,
    /// Channel number as sent, `None` when it is not an integer
    pub channel: Option<u32>,
    /// Module type name
    pub module: String,
    /// Positional arguments
    pub args: Vec<String>,
}

impl CommandRecord {
    fn parse(line: &str) -> Option<Self> {
        let mut chars = line.chars();
        let code = CommandCode::from(chars.next()?);
        // Skip the single separator following the code letter
        chars.next();
        let payload = chars.as_str();

        let mut tokens = payload.split(['/', ' ', ',']);
        let channel = tokens.next().and_then(|t| t.trim().parse::<u32>().ok());
        let module = tokens.next().unwrap_or_default().trim().to_string();
        let args = tokens.map(|t| t.trim().to_string()).collect();

        Some(Self {
            code,
            channel,
            module,
            args,
        })
    }

    /// Zero-based slot for the channel, or `None` if it is not 1..=8
    pub fn slot_index(&self) -> Option<usize> {
        self.channel
            .filter(|c| super::is_valid_channel(*c))
            .map(|c| (c - 1) as usize)
    }
}

/// Decode one line of dock output.
///
/// Returns `None` for blank lines. Lines starting with `#` become
/// [`Record::Info`]; everything else becomes [`Record::Command`].
pub fn decode_line(raw: &str) -> Option<Record> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(body) = line.strip_prefix('#') {
        return Some(Record::Info(InfoRecord::parse(body.trim())));
    }
    CommandRecord::parse(line).map(Record::Command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> CommandRecord {
        match decode_line(line) {
            Some(Record::Command(record)) => record,
            other => panic!("expected command record, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(decode_line(""), None);
        assert_eq!(decode_line("  \r"), None);
    }

    #[test]
    fn identity_fields() {
        assert_eq!(decode_line("# Version: 1.12"), Some(Record::Info(InfoRecord::Version(1.12))));
        assert_eq!(
            decode_line("# Serial: 0B1F2C3D\r"),
            Some(Record::Info(InfoRecord::Serial("0B1F2C3D".into())))
        );
        assert_eq!(decode_line("#User: maker"), Some(Record::Info(InfoRecord::User("maker".into()))));
        assert_eq!(
            decode_line("# Dock: Work bench"),
            Some(Record::Info(InfoRecord::Dock("Work bench".into())))
        );
    }

    #[test]
    fn other_info_is_a_message() {
        assert_eq!(
            decode_line("# Flotilla ready to set sail.."),
            Some(Record::Info(InfoRecord::Message("Flotilla ready to set sail..".into())))
        );
        assert_eq!(
            decode_line("# Version: beta"),
            Some(Record::Info(InfoRecord::Message("Version: beta".into())))
        );
        // Field names must match exactly, colon included
        assert_eq!(
            decode_line("# Docked"),
            Some(Record::Info(InfoRecord::Message("Docked".into())))
        );
    }

    #[test]
    fn update_line_tokens() {
        let record = command("u 4/colour 51,102,153,204");
        assert_eq!(record.code, CommandCode::Update);
        assert_eq!(record.channel, Some(4));
        assert_eq!(record.slot_index(), Some(3));
        assert_eq!(record.module, "colour");
        assert_eq!(record.args, vec!["51", "102", "153", "204"]);
    }

    #[test]
    fn disconnect_without_arguments() {
        let record = command("d 3/dial");
        assert_eq!(record.code, CommandCode::Disconnected);
        assert_eq!(record.slot_index(), Some(2));
        assert!(record.args.is_empty());
    }

    #[test]
    fn bad_channel_has_no_slot() {
        let record = command("u x/dial 10");
        assert_eq!(record.channel, None);
        assert_eq!(record.slot_index(), None);

        assert_eq!(command("u 9/dial 10").slot_index(), None);
        assert_eq!(command("u 0/dial 10").slot_index(), None);
    }

    #[test]
    fn malformed_line_decodes_identically_each_time() {
        let first = decode_line("zzz not protocol");
        let second = decode_line("zzz not protocol");
        assert_eq!(first, second);
        match first {
            Some(Record::Command(record)) => {
                assert_eq!(record.code, CommandCode::Unknown('z'));
                assert_eq!(record.slot_index(), None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
