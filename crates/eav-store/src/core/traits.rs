//! Core traits shared by every database engine.
//!
//! - [`Dialect`]: SQL text strategy (DDL, existence checks, upserts, placeholders)
//! - [`DbConnection`]: one open connection, able to run parameterized
//!   statements, batches and explicit transactions
//!
//! Dialects are pure string builders and are unit tested without a database.
//! Connections wrap a pooled driver connection and are returned to their pool
//! by [`DbConnection::release`].

use async_trait::async_trait;

use crate::core::schema::{ColumnType, ComponentKind, IndexDef, TableDef, Upsert};
use crate::core::value::{Row, SqlValue};
use crate::error::Result;

/// Catalog query answering "does this component exist?".
///
/// The statement must return a single integer column; a value greater than
/// zero means the component exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsQuery {
    pub sql: String,
    pub params: Vec<SqlValue<'static>>,
}

/// SQL syntax strategy for one database engine.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "sqlite", "postgres").
    fn name(&self) -> &str;

    /// Get a parameter placeholder for the given 1-based index.
    ///
    /// - SQLite, MySQL: `?`
    /// - PostgreSQL: `$1`, `$2`, etc.
    /// - SQL Server: `@P1`, `@P2`, etc.
    fn param_placeholder(&self, index: usize) -> String;

    /// Engine type for a logical column type.
    fn column_type(&self, column_type: ColumnType) -> &'static str;

    /// Catalog query for a component, `None` when the engine cannot have
    /// components of that kind (e.g. stored procedures on SQLite).
    fn exists_query(&self, kind: ComponentKind, name: &str) -> Option<ExistsQuery>;

    /// Catalog query for one column of a table.
    fn column_exists_query(&self, table: &str, column: &str) -> ExistsQuery;

    /// Whether upserts can be routed through stored procedures.
    fn supports_callable_statements(&self) -> bool;

    /// Render an upsert for `upsert` whose bound values are the given SQL
    /// expressions (placeholders or procedure parameter names).
    fn build_upsert_with(&self, upsert: Upsert, values: &[String]) -> String;

    /// Stored-procedure call for `upsert`, `None` without procedural SQL.
    fn build_call(&self, upsert: Upsert) -> Option<String>;

    /// `CREATE PROCEDURE` text for `upsert`, `None` without procedural SQL.
    fn create_procedure(&self, upsert: Upsert) -> Option<String>;

    /// Trigger removing bindings whose parent overview row was deleted.
    fn create_cascade_trigger(&self) -> String;

    /// Statement used by health checks.
    fn liveness_query(&self) -> &'static str {
        "SELECT 1"
    }

    /// Comma separated placeholders for `count` parameters starting at `start`.
    fn placeholders(&self, start: usize, count: usize) -> Vec<String> {
        (start..start + count).map(|i| self.param_placeholder(i)).collect()
    }

    /// Literal parameterized upsert for `upsert`.
    fn build_upsert(&self, upsert: Upsert) -> String {
        let values = self.placeholders(1, upsert.def().columns.len());
        self.build_upsert_with(upsert, &values)
    }

    /// Plain parameterized INSERT.
    fn build_insert(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            self.placeholders(1, columns.len()).join(", ")
        )
    }

    /// Parameterized DELETE matching every column in `key_columns`.
    fn build_delete(&self, table: &str, key_columns: &[&str]) -> String {
        let conditions = key_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", c, self.param_placeholder(i + 1)))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("DELETE FROM {} WHERE {}", table, conditions)
    }

    /// Column definition inside CREATE TABLE.
    fn column_definition(&self, name: &str, column_type: ColumnType, nullable: bool) -> String {
        let null = if nullable { "" } else { " NOT NULL" };
        format!("{} {}{}", name, self.column_type(column_type), null)
    }

    /// CREATE TABLE text for a catalog table.
    fn create_table(&self, table: &TableDef) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c.name, c.column_type, c.nullable))
            .collect();
        if !table.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", table.primary_key.join(", ")));
        }
        format!("CREATE TABLE {} ({})", table.name, parts.join(", "))
    }

    /// Add one column to an existing table.
    fn add_column(&self, table: &str, column_definition: &str) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", table, column_definition)
    }

    /// CREATE INDEX text for a catalog index.
    fn create_index(&self, index: &IndexDef) -> String {
        format!(
            "CREATE INDEX {} ON {} ({})",
            index.name,
            index.table.name,
            index.columns.join(", ")
        )
    }
}

/// One open database connection.
///
/// All methods run on the connection they are called on; statements issued
/// between [`begin`](Self::begin) and [`commit`](Self::commit) share one
/// transaction.
#[async_trait]
pub trait DbConnection: Send {
    /// Dialect identifier of the engine behind this connection.
    fn dialect_name(&self) -> &'static str;

    /// Execute one parameterized statement, returning rows affected.
    async fn execute(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64>;

    /// Execute the same statement once per row.
    async fn execute_batch(&mut self, sql: &str, rows: &[Row<'_>]) -> Result<u64> {
        let mut affected = 0;
        for row in rows {
            affected += self.execute(sql, row).await?;
        }
        Ok(affected)
    }

    /// Execute unparameterized SQL (DDL, procedure bodies) verbatim.
    async fn execute_script(&mut self, sql: &str) -> Result<()>;

    /// First column of the first row as an integer.
    async fn query_i64(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<Option<i64>>;

    /// All values of the named string column, in row order.
    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
        column: &str,
    ) -> Result<Vec<String>>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction opened by [`begin`](Self::begin) is still open.
    fn in_transaction(&self) -> bool;

    /// Roll back any open transaction before the connection is dropped
    /// back into its pool.
    async fn release(&mut self) {
        if self.in_transaction() {
            if let Err(e) = self.rollback().await {
                tracing::warn!("Rollback on release failed: {}", e);
            }
        }
    }
}

/// Position of `column` in `names`, ignoring ASCII case.
///
/// PostgreSQL folds unquoted identifiers to lower case, so result columns are
/// matched case-insensitively on every engine.
pub fn column_index<'a, I>(names: I, column: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().position(|n| n.eq_ignore_ascii_case(column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index_ignores_case() {
        let names = ["entityguid", "datecreated"];
        assert_eq!(column_index(names, "EntityGuid"), Some(0));
        assert_eq!(column_index(names, "DateCreated"), Some(1));
        assert_eq!(column_index(names, "Missing"), None);
    }
}
