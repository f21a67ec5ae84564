//! Configuration type definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::drivers::Engine;
use crate::tables::ReportTable;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection configuration.
    pub database: DatabaseConfig,

    /// Engine behaviour toggles.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Flat reporting tables written alongside the EAV tables.
    #[serde(default)]
    pub report_tables: Vec<ReportTable>,
}

impl Config {
    /// Configuration with default engine toggles.
    pub fn new(connection: ConnectionProperties) -> Self {
        Self {
            database: DatabaseConfig {
                connection,
                max_connections: default_max_connections(),
                acquire_timeout_secs: default_acquire_timeout_secs(),
            },
            engine: EngineConfig::default(),
            report_tables: Vec::new(),
        }
    }

    /// Replace the engine toggles.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection properties, in one of the two accepted forms.
    #[serde(flatten)]
    pub connection: ConnectionProperties,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection (default: 30).
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Connection properties.
///
/// Either a driver id with url and credentials, or a url with an
/// engine-specific property bag (the engine is taken from the url scheme).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionProperties {
    Credentials {
        /// Driver id: `sqlite`, `postgres`, `mssql` or `mysql`.
        driver: String,
        url: String,
        user: String,
        #[serde(default)]
        password: String,
    },
    Properties {
        url: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
}

impl ConnectionProperties {
    pub fn credentials(
        driver: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        ConnectionProperties::Credentials {
            driver: driver.into(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn properties(url: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        ConnectionProperties::Properties {
            url: url.into(),
            properties,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ConnectionProperties::Credentials { url, .. } => url,
            ConnectionProperties::Properties { url, .. } => url,
        }
    }

    /// Engine named by the driver id or, for the property-bag form, the url.
    pub fn engine(&self) -> Option<Engine> {
        match self {
            ConnectionProperties::Credentials { driver, .. } => Engine::from_driver(driver),
            ConnectionProperties::Properties { url, .. } => Engine::from_url(url),
        }
    }

    /// User and password, when given.
    pub fn credentials_pair(&self) -> (Option<&str>, Option<&str>) {
        match self {
            ConnectionProperties::Credentials { user, password, .. } => {
                let password = (!password.is_empty()).then_some(password.as_str());
                (Some(user.as_str()), password)
            }
            ConnectionProperties::Properties { .. } => (None, None),
        }
    }

    /// Engine-specific property bag (empty for the credentials form).
    pub fn property_bag(&self) -> BTreeMap<String, String> {
        match self {
            ConnectionProperties::Credentials { .. } => BTreeMap::new(),
            ConnectionProperties::Properties { properties, .. } => properties.clone(),
        }
    }
}

/// How category commits are grouped into transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One transaction per category; a failed category is logged, recorded
    /// and skipped while the rest of the save continues.
    #[default]
    Fast,
    /// One transaction around the whole save; the first failure rolls
    /// everything back and is returned as an error.
    Strict,
}

/// What to do with existing bindings when a parent's current reference list
/// for a child type is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebindPolicy {
    /// Leave earlier bindings in place.
    #[default]
    PreserveWhenEmpty,
    /// Treat absence as "unbind everything of that type".
    ClearWhenEmpty,
}

/// Engine behaviour toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Write every saved value to `StoreOldFieldValues` as well.
    #[serde(default)]
    pub log_edits: bool,

    /// Log batch and category progress at info level.
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub write_mode: WriteMode,

    #[serde(default)]
    pub rebind_policy: RebindPolicy,

    /// Route upserts through stored procedures where the dialect has them.
    #[serde(default = "default_true")]
    pub use_stored_procedures: bool,

    /// Directory of `<dialect>/<Component>.sql` files overriding built-in DDL.
    #[serde(default)]
    pub sql_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_edits: false,
            verbose: false,
            write_mode: WriteMode::default(),
            rebind_policy: RebindPolicy::default(),
            use_stored_procedures: true,
            sql_dir: None,
        }
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
