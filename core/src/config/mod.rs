//! Configuration management
//!
//! All configuration types are exported from this module.

pub mod manager;
pub mod types;

#[cfg(test)]
mod tests;

pub use manager::ENV_PREFIX;
pub use types::{
    BrokerConfig, DeviceConfig, ModuleConfig, SchedulerSection, SignalValue, SnapshotConfig,
};

use std::path::PathBuf;

/// File name looked up by [`find_config_file`]
pub const CONFIG_FILE_NAME: &str = "dgi-broker.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error occurred while reading/writing config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// Layered source could not be read or deserialized
    #[error("Config source error: {0}")]
    Source(#[from] ::config::ConfigError),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Find the configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(dir) = get_config_dir() {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Get the configuration directory path
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dgi-broker"))
}
