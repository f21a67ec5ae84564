//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for T-SQL
//! - [`MssqlConnection`]: pooled `tiberius` client

mod connection;
mod dialect;

pub use connection::{build_pool, MssqlConnection, TiberiusConnectionManager};
pub use dialect::MssqlDialect;
