//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::drivers::Engine;
use crate::error::{Result, StoreError};
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Engine selected by the connection properties.
    pub fn engine(&self) -> Result<Engine> {
        self.database.connection.engine().ok_or_else(|| {
            StoreError::Config("database engine could not be determined".into())
        })
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.database.acquire_timeout_secs)
    }
}
