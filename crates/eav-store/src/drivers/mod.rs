//! Database driver implementations.
//!
//! Each driver module provides:
//! - a `Dialect`: SQL syntax strategy for the engine
//! - a connection type implementing `DbConnection` over a pooled driver
//!   connection
//! - `build_pool`: pool construction from connection properties
//!
//! - [`sqlite`]: SQLite via `sqlx`
//! - [`postgres`]: PostgreSQL via `tokio-postgres` + `deadpool-postgres`
//! - [`mssql`]: Microsoft SQL Server via `tiberius` + `bb8`
//! - [`mysql`]: MySQL via `sqlx`
//! - [`common`]: SQL builders shared between dialects
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect` and `DbConnection`
//! 3. Add variants to [`Engine`], [`DialectImpl`] and [`ConnectionPool`]

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mssql::MssqlDialect;
pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::core::schema::{ColumnType, ComponentKind, IndexDef, TableDef, Upsert};
use crate::core::traits::{DbConnection, Dialect, ExistsQuery};
use crate::error::Result;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Sqlite,
    Postgres,
    Mssql,
    Mysql,
}

impl Engine {
    /// Resolve a driver id, accepting the common aliases.
    pub fn from_driver(driver: &str) -> Option<Self> {
        match driver.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Engine::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(Engine::Postgres),
            "mssql" | "sqlserver" | "tsql" => Some(Engine::Mssql),
            "mysql" | "mariadb" => Some(Engine::Mysql),
            _ => None,
        }
    }

    /// Infer the engine from a connection url.
    ///
    /// ADO.NET style strings (`server=...;database=...`) select SQL Server.
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.trim().to_lowercase();
        if lower.starts_with("sqlite:") {
            Some(Engine::Sqlite)
        } else if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Engine::Postgres)
        } else if lower.starts_with("mysql://") {
            Some(Engine::Mysql)
        } else if lower.starts_with("server=")
            || lower.starts_with("data source=")
            || lower.contains(";server=")
        {
            Some(Engine::Mssql)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Postgres => "postgres",
            Engine::Mssql => "mssql",
            Engine::Mysql => "mysql",
        }
    }

    pub fn dialect(&self) -> DialectImpl {
        match self {
            Engine::Sqlite => DialectImpl::Sqlite(SqliteDialect::new()),
            Engine::Postgres => DialectImpl::Postgres(PostgresDialect::new()),
            Engine::Mssql => DialectImpl::Mssql(MssqlDialect::new()),
            Engine::Mysql => DialectImpl::Mysql(MysqlDialect::new()),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enum-based static dispatch for dialects.
///
/// The compiler generates a match instead of vtable dispatch.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Sqlite(SqliteDialect),
    Postgres(PostgresDialect),
    Mssql(MssqlDialect),
    Mysql(MysqlDialect),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $call:expr) => {
        match $self {
            DialectImpl::Sqlite($d) => $call,
            DialectImpl::Postgres($d) => $call,
            DialectImpl::Mssql($d) => $call,
            DialectImpl::Mysql($d) => $call,
        }
    };
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn param_placeholder(&self, index: usize) -> String {
        dispatch!(self, d => d.param_placeholder(index))
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        dispatch!(self, d => d.column_type(column_type))
    }

    fn exists_query(&self, kind: ComponentKind, name: &str) -> Option<ExistsQuery> {
        dispatch!(self, d => d.exists_query(kind, name))
    }

    fn column_exists_query(&self, table: &str, column: &str) -> ExistsQuery {
        dispatch!(self, d => d.column_exists_query(table, column))
    }

    fn supports_callable_statements(&self) -> bool {
        dispatch!(self, d => d.supports_callable_statements())
    }

    fn build_upsert_with(&self, upsert: Upsert, values: &[String]) -> String {
        dispatch!(self, d => d.build_upsert_with(upsert, values))
    }

    fn build_call(&self, upsert: Upsert) -> Option<String> {
        dispatch!(self, d => d.build_call(upsert))
    }

    fn create_procedure(&self, upsert: Upsert) -> Option<String> {
        dispatch!(self, d => d.create_procedure(upsert))
    }

    fn create_cascade_trigger(&self) -> String {
        dispatch!(self, d => d.create_cascade_trigger())
    }

    fn liveness_query(&self) -> &'static str {
        dispatch!(self, d => d.liveness_query())
    }

    fn column_definition(&self, name: &str, column_type: ColumnType, nullable: bool) -> String {
        dispatch!(self, d => d.column_definition(name, column_type, nullable))
    }

    fn create_table(&self, table: &TableDef) -> String {
        dispatch!(self, d => d.create_table(table))
    }

    fn add_column(&self, table: &str, column_definition: &str) -> String {
        dispatch!(self, d => d.add_column(table, column_definition))
    }

    fn create_index(&self, index: &IndexDef) -> String {
        dispatch!(self, d => d.create_index(index))
    }
}

/// Connection pool for the configured engine.
#[derive(Clone)]
pub enum ConnectionPool {
    Sqlite(sqlx::SqlitePool),
    Postgres(deadpool_postgres::Pool),
    Mssql(bb8::Pool<mssql::TiberiusConnectionManager>),
    Mysql(sqlx::MySqlPool),
}

impl ConnectionPool {
    /// Build the pool described by `config`. No connection is opened yet.
    pub fn build(config: &Config) -> Result<Self> {
        let engine = config.engine()?;
        let db = &config.database;
        let url = db.connection.url();
        let (user, password) = db.connection.credentials_pair();
        let properties = db.connection.property_bag();
        let timeout = config.acquire_timeout();

        info!(
            "Creating {} pool (max {} connections)",
            engine, db.max_connections
        );

        let pool = match engine {
            Engine::Sqlite => ConnectionPool::Sqlite(sqlite::build_pool(
                url,
                &properties,
                db.max_connections,
                timeout,
            )?),
            Engine::Postgres => ConnectionPool::Postgres(postgres::build_pool(
                url,
                user,
                password,
                &properties,
                db.max_connections as usize,
            )?),
            Engine::Mssql => {
                let manager =
                    mssql::TiberiusConnectionManager::new(url, user, password, &properties)?;
                ConnectionPool::Mssql(mssql::build_pool(manager, db.max_connections, timeout))
            }
            Engine::Mysql => ConnectionPool::Mysql(mysql::build_pool(
                url,
                user,
                password,
                &properties,
                db.max_connections,
                timeout,
            )?),
        };
        Ok(pool)
    }

    pub fn engine(&self) -> Engine {
        match self {
            ConnectionPool::Sqlite(_) => Engine::Sqlite,
            ConnectionPool::Postgres(_) => Engine::Postgres,
            ConnectionPool::Mssql(_) => Engine::Mssql,
            ConnectionPool::Mysql(_) => Engine::Mysql,
        }
    }

    /// Check out one connection.
    pub async fn acquire(&self) -> Result<Box<dyn DbConnection>> {
        let conn: Box<dyn DbConnection> = match self {
            ConnectionPool::Sqlite(pool) => Box::new(sqlite::SqliteConnection::acquire(pool).await?),
            ConnectionPool::Postgres(pool) => {
                Box::new(postgres::PostgresConnection::acquire(pool).await?)
            }
            ConnectionPool::Mssql(pool) => Box::new(mssql::MssqlConnection::acquire(pool).await?),
            ConnectionPool::Mysql(pool) => Box::new(mysql::MysqlConnection::acquire(pool).await?),
        };
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_driver_aliases() {
        assert_eq!(Engine::from_driver("PostgreSQL"), Some(Engine::Postgres));
        assert_eq!(Engine::from_driver("sqlserver"), Some(Engine::Mssql));
        assert_eq!(Engine::from_driver("mariadb"), Some(Engine::Mysql));
        assert_eq!(Engine::from_driver("sqlite3"), Some(Engine::Sqlite));
        assert_eq!(Engine::from_driver("oracle"), None);
    }

    #[test]
    fn test_engine_from_url() {
        assert_eq!(Engine::from_url("sqlite::memory:"), Some(Engine::Sqlite));
        assert_eq!(Engine::from_url("postgres://u@h/db"), Some(Engine::Postgres));
        assert_eq!(Engine::from_url("mysql://u@h/db"), Some(Engine::Mysql));
        assert_eq!(
            Engine::from_url("Server=tcp:db,1433;Database=eav;"),
            Some(Engine::Mssql)
        );
        assert_eq!(Engine::from_url("http://example"), None);
    }

    #[test]
    fn test_dialect_dispatch() {
        assert_eq!(Engine::Postgres.dialect().param_placeholder(2), "$2");
        assert_eq!(Engine::Mssql.dialect().param_placeholder(2), "@P2");
        assert_eq!(Engine::Sqlite.dialect().param_placeholder(2), "?");
        assert!(!Engine::Sqlite.dialect().supports_callable_statements());
        assert!(Engine::Mysql.dialect().supports_callable_statements());
    }
}
