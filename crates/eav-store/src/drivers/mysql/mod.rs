//! MySQL driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy for MySQL
//! - [`MysqlConnection`]: pooled `sqlx` connection

mod connection;
mod dialect;

pub use connection::{build_pool, MysqlConnection};
pub use dialect::MysqlDialect;
