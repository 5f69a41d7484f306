//! Configuration module
//!
//! Handles dock connection settings stored as TOML

mod settings;

pub use settings::DockSettings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Settings file name inside the configuration directory
pub const CONFIG_FILE: &str = "flotilla.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid settings TOML
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be serialized
    #[error("Could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No home directory to derive a config location from
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "flotilla", "Flotilla").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default settings file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}
