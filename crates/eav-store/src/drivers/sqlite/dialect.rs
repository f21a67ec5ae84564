//! SQLite SQL dialect.
//!
//! SQLite has no stored procedures, so every upsert is a literal
//! `INSERT ... ON CONFLICT` statement.

use crate::core::schema::{ColumnType, ComponentKind, Upsert};
use crate::core::traits::{Dialect, ExistsQuery};
use crate::core::value::SqlValue;
use crate::drivers::common::on_conflict_upsert;

/// SQLite dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Create a new SQLite dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Guid | ColumnType::Name | ColumnType::Text => "TEXT",
            ColumnType::Int => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "REAL",
            ColumnType::Double => "DOUBLE",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Blob => "BLOB",
            ColumnType::DateTime => "TIMESTAMP",
        }
    }

    fn exists_query(&self, kind: ComponentKind, name: &str) -> Option<ExistsQuery> {
        let object_type = match kind {
            ComponentKind::Table => "table",
            ComponentKind::Index => "index",
            ComponentKind::Trigger => "trigger",
            ComponentKind::StoredProcedure => return None,
        };
        Some(ExistsQuery {
            sql: "SELECT COUNT(name) AS Result FROM sqlite_master WHERE type = ? AND name = ?"
                .to_string(),
            params: vec![
                SqlValue::from(object_type.to_string()),
                SqlValue::from(name.to_string()),
            ],
        })
    }

    fn column_exists_query(&self, table: &str, column: &str) -> ExistsQuery {
        ExistsQuery {
            sql: "SELECT COUNT(*) AS Result FROM pragma_table_info(?) WHERE name = ?".to_string(),
            params: vec![
                SqlValue::from(table.to_string()),
                SqlValue::from(column.to_string()),
            ],
        }
    }

    fn supports_callable_statements(&self) -> bool {
        false
    }

    fn build_upsert_with(&self, upsert: Upsert, values: &[String]) -> String {
        on_conflict_upsert(upsert, values)
    }

    fn build_call(&self, _upsert: Upsert) -> Option<String> {
        None
    }

    fn create_procedure(&self, _upsert: Upsert) -> Option<String> {
        None
    }

    fn create_cascade_trigger(&self) -> String {
        "CREATE TRIGGER CascadeEntityBinding AFTER DELETE ON StoreEntityOverview \
         FOR EACH ROW BEGIN \
         DELETE FROM StoreEntityBinding WHERE ParentEntityGuid = OLD.EntityGuid; \
         END"
            .to_string()
    }
}
