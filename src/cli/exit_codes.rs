//! Process exit codes for `flotilla-cli`
//!
//! Scripts can tell a missing dock from a dock that never identified.

use crate::config::ConfigError;
use crate::core::error::DockError;
use std::process::ExitCode;

/// Exit codes returned by `flotilla-cli`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Transport could not be opened
    pub const CONNECTION_FAILED: u8 = 3;

    /// Dock did not identify in time
    pub const TIMEOUT: u8 = 4;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Link fault while connected
    pub const PROTOCOL_ERROR: u8 = 9;

    /// No dock found
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Command sent before the dock identified
    pub const NOT_IDENTIFIED: u8 = 18;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// Outcome of one CLI command
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Whether the command succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&DockError> for CliResult {
    fn from(err: &DockError) -> Self {
        let code = match err {
            DockError::TransportUnavailable { .. } => ExitCodes::CONNECTION_FAILED,
            DockError::IdentityTimeout { .. } => ExitCodes::TIMEOUT,
            DockError::TransportFault(_) | DockError::SessionClosed => ExitCodes::PROTOCOL_ERROR,
            DockError::NotIdentified => ExitCodes::NOT_IDENTIFIED,
            DockError::InvalidChannel(_) => ExitCodes::INVALID_ARGS,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<&anyhow::Error> for CliResult {
    fn from(err: &anyhow::Error) -> Self {
        if let Some(dock) = err.downcast_ref::<DockError>() {
            return dock.into();
        }
        if let Some(config) = err.downcast_ref::<ConfigError>() {
            return config.into();
        }
        Self::Error(ExitCodes::ERROR, format!("{err:#}"))
    }
}

/// Human-readable meaning of `code`
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Dock identification timeout",
        8 => "Configuration error",
        9 => "Link fault",
        12 => "No dock found",
        18 => "Dock not identified",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print every documented exit code
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 8, 9, 12, 18, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_error_results() {
        let sent = CliResult::Success(Some("sent 3 values to channel 2".into()));
        assert!(sent.is_success());
        assert_eq!(sent.code(), ExitCodes::SUCCESS);
        assert_eq!(sent.message(), Some("sent 3 values to channel 2"));
        assert_eq!(CliResult::success().message(), None);

        let missing = CliResult::error(ExitCodes::DEVICE_NOT_FOUND, "no dock on /dev/ttyACM0");
        assert!(!missing.is_success());
        assert_eq!(missing.code(), 12);
    }

    #[test]
    fn test_from_dock_error() {
        let timeout = DockError::IdentityTimeout {
            key: "/dev/ttyACM0".into(),
            timeout_ms: 4000,
        };
        assert_eq!(CliResult::from(&timeout).code(), ExitCodes::TIMEOUT);
        assert_eq!(CliResult::from(&DockError::InvalidChannel(9)).code(), ExitCodes::INVALID_ARGS);
    }

    #[test]
    fn test_from_anyhow_downcasts() {
        let err = anyhow::Error::new(DockError::NotIdentified);
        assert_eq!(CliResult::from(&err).code(), ExitCodes::NOT_IDENTIFIED);

        let other = anyhow::anyhow!("boom");
        assert_eq!(CliResult::from(&other).code(), ExitCodes::ERROR);
    }

    #[test]
    fn test_descriptions_cover_table() {
        for code in [0, 1, 2, 3, 4, 8, 9, 12, 18, 127] {
            assert_ne!(exit_code_description(code), "Unknown error");
        }
    }
}
