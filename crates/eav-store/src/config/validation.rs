//! Configuration validation.

use std::collections::HashSet;

use super::{Config, ConnectionProperties};
use crate::drivers::Engine;
use crate::error::{Result, StoreError};
use crate::tables::is_identifier;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let connection = &config.database.connection;

    if connection.url().trim().is_empty() {
        return Err(StoreError::Config("database.url is required".into()));
    }

    match connection {
        ConnectionProperties::Credentials { driver, user, .. } => {
            if driver.trim().is_empty() {
                return Err(StoreError::Config("database.driver is required".into()));
            }
            let engine = Engine::from_driver(driver).ok_or_else(|| {
                StoreError::Config(format!(
                    "database.driver must be one of sqlite, postgres, mssql, mysql, got '{}'",
                    driver
                ))
            })?;
            if engine != Engine::Sqlite && user.trim().is_empty() {
                return Err(StoreError::Config("database.user is required".into()));
            }
        }
        ConnectionProperties::Properties { url, .. } => {
            if Engine::from_url(url).is_none() {
                return Err(StoreError::Config(format!(
                    "cannot determine the database engine from url '{}'",
                    url
                )));
            }
        }
    }

    if config.database.max_connections == 0 {
        return Err(StoreError::Config(
            "database.max_connections must be at least 1".into(),
        ));
    }

    let mut names = HashSet::new();
    for table in &config.report_tables {
        if !is_identifier(&table.name) {
            return Err(StoreError::Config(format!(
                "report table name '{}' must be a plain identifier",
                table.name
            )));
        }
        if !names.insert(table.name.to_lowercase()) {
            return Err(StoreError::Config(format!(
                "report table '{}' is declared twice",
                table.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::ReportTable;
    use std::collections::BTreeMap;

    fn credentials(driver: &str, user: &str) -> Config {
        Config::new(ConnectionProperties::credentials(
            driver,
            "postgres://localhost/eav",
            user,
            "secret",
        ))
    }

    #[test]
    fn test_valid_credentials() {
        assert!(validate(&credentials("postgres", "app")).is_ok());
    }

    #[test]
    fn test_unknown_driver() {
        let err = validate(&credentials("oracle", "app")).unwrap_err();
        assert!(err.to_string().contains("database.driver"));
    }

    #[test]
    fn test_missing_user() {
        let err = validate(&credentials("postgres", " ")).unwrap_err();
        assert!(err.to_string().contains("database.user"));
    }

    #[test]
    fn test_sqlite_needs_no_user() {
        let config = Config::new(ConnectionProperties::credentials(
            "sqlite",
            "sqlite://eav.db",
            "",
            "",
        ));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_url() {
        let config = Config::new(ConnectionProperties::properties("", BTreeMap::new()));
        assert!(matches!(validate(&config), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_property_bag_needs_known_scheme() {
        let config = Config::new(ConnectionProperties::properties(
            "oracle://db/eav",
            BTreeMap::new(),
        ));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_connections() {
        let mut config = credentials("postgres", "app");
        config.database.max_connections = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_report_table_names_must_be_identifiers() {
        let mut config = credentials("postgres", "app");
        config.report_tables.push(ReportTable::new("person report"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("plain identifier"));
    }

    #[test]
    fn test_report_table_declared_twice() {
        let mut config = credentials("postgres", "app");
        config.report_tables.push(ReportTable::new("PersonReport"));
        config.report_tables.push(ReportTable::new("personreport"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }
}
