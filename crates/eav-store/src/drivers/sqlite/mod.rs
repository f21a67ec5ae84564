//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy for SQLite
//! - [`SqliteConnection`]: pooled `sqlx` connection

mod connection;
mod dialect;

pub use connection::{build_pool, SqliteConnection};
pub use dialect::SqliteDialect;
