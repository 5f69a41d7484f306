//! CLI Module
//!
//! Helpers for the `flotilla-cli` binary:
//! - Exit codes for automation
//! - Text and JSON rendering of dock events

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{describe_port, format_event, OutputFormat};
