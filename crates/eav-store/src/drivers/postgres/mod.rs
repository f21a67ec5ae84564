//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresConnection`]: pooled `tokio-postgres` connection

mod connection;
mod dialect;

pub use connection::{build_pool, PostgresConnection};
pub use dialect::PostgresDialect;
