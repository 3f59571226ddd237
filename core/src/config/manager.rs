//! Loading and saving [`BrokerConfig`]
//!
//! Sources are layered with the `config` crate: the optional TOML file first,
//! then `DGI_*` environment variables. Nested keys use `__`, so
//! `DGI_SCHEDULER__CLOCK_SKEW_MS=15` overrides `scheduler.clock_skew_ms`.

use std::fs;
use std::path::Path;

use ::config::{Config as Layered, Environment, File, FileFormat, Map};
use tracing::{debug, info};

use super::{BrokerConfig, ConfigError};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "DGI";

fn environment(vars: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("peers")
        .source(vars)
}

impl BrokerConfig {
    /// Load from `path` (if given) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Load from `path` with an explicit variable set instead of the process
    /// environment. `None` reads the real environment.
    pub fn load_with_env(
        path: Option<&Path>,
        vars: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Layered::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file {} not found", path.display()),
                )));
            }
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(environment(vars));

        let config: BrokerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: BrokerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }
}
