//! MySQL SQL dialect (Strategy pattern).
//!
//! Catalog lookups are restricted to the connection's current database.

use crate::core::schema::{ColumnType, ComponentKind, Upsert};
use crate::core::traits::{Dialect, ExistsQuery};
use crate::core::value::SqlValue;
use crate::drivers::common::procedure_params;

/// MySQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Guid => "VARCHAR(96)",
            ColumnType::Name => "VARCHAR(256)",
            ColumnType::Text => "TEXT",
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Blob => "BLOB",
            ColumnType::DateTime => "DATETIME(6)",
        }
    }

    fn exists_query(&self, kind: ComponentKind, name: &str) -> Option<ExistsQuery> {
        let sql = match kind {
            ComponentKind::Table => {
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
            }
            ComponentKind::StoredProcedure => {
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.ROUTINES \
                 WHERE ROUTINE_SCHEMA = DATABASE() AND ROUTINE_TYPE = 'PROCEDURE' AND ROUTINE_NAME = ?"
            }
            ComponentKind::Trigger => {
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TRIGGERS \
                 WHERE TRIGGER_SCHEMA = DATABASE() AND TRIGGER_NAME = ?"
            }
            ComponentKind::Index => {
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.STATISTICS \
                 WHERE TABLE_SCHEMA = DATABASE() AND INDEX_NAME = ?"
            }
        };
        Some(ExistsQuery {
            sql: sql.to_string(),
            params: vec![SqlValue::from(name.to_string())],
        })
    }

    fn column_exists_query(&self, table: &str, column: &str) -> ExistsQuery {
        ExistsQuery {
            sql: "SELECT COUNT(*) FROM INFORMATION_SCHEMA.COLUMNS \
                  WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?"
                .to_string(),
            params: vec![
                SqlValue::from(table.to_string()),
                SqlValue::from(column.to_string()),
            ],
        }
    }

    fn supports_callable_statements(&self) -> bool {
        true
    }

    fn build_upsert_with(&self, upsert: Upsert, values: &[String]) -> String {
        let def = upsert.def();
        // With nothing to refresh, re-assign the first key so duplicates are ignored.
        let update_set = if def.update_columns.is_empty() {
            format!("{0} = {0}", def.key_columns[0])
        } else {
            def.update_columns
                .iter()
                .map(|c| format!("{0} = VALUES({0})", c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            def.table.name,
            def.columns.join(", "),
            values.join(", "),
            update_set
        )
    }

    fn build_call(&self, upsert: Upsert) -> Option<String> {
        let params = self.placeholders(1, upsert.def().columns.len());
        Some(format!("CALL {}({})", upsert.procedure_name(), params.join(", ")))
    }

    fn create_procedure(&self, upsert: Upsert) -> Option<String> {
        let params = procedure_params(upsert.def());
        let signature = params
            .iter()
            .map(|(name, ty)| format!("IN {} {}", name, self.column_type(*ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let names: Vec<String> = params.into_iter().map(|(name, _)| name).collect();

        Some(format!(
            "CREATE PROCEDURE {}({})\nBEGIN\n    {};\nEND",
            upsert.procedure_name(),
            signature,
            self.build_upsert_with(upsert, &names)
        ))
    }

    fn create_cascade_trigger(&self) -> String {
        "CREATE TRIGGER CascadeEntityBinding AFTER DELETE ON StoreEntityOverview \
         FOR EACH ROW DELETE FROM StoreEntityBinding WHERE ParentEntityGuid = OLD.EntityGuid"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_upsert_on_duplicate_key() {
        let sql = MysqlDialect::new().build_upsert(Upsert::Double);
        assert_eq!(
            sql,
            "INSERT INTO StoreDouble (EntityGuid, FieldId, Value) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE Value = VALUES(Value)"
        );
    }

    #[test]
    fn test_build_upsert_key_only() {
        let sql = MysqlDialect::new().build_upsert(Upsert::EntityFields);
        assert!(sql.ends_with("ON DUPLICATE KEY UPDATE EntityId = EntityId"));
    }

    #[test]
    fn test_exists_query_scoped_to_database() {
        let q = MysqlDialect::new()
            .exists_query(ComponentKind::StoredProcedure, "procStoreLong")
            .unwrap();
        assert!(q.sql.contains("ROUTINE_TYPE = 'PROCEDURE'"));
        assert!(q.sql.contains("DATABASE()"));
    }

    #[test]
    fn test_create_procedure() {
        let sql = MysqlDialect::new().create_procedure(Upsert::EntityName).unwrap();
        assert!(sql.starts_with("CREATE PROCEDURE procRefEntities(IN pEntityId BIGINT, IN pEntityName VARCHAR(256))"));
        assert!(sql.contains("VALUES (pEntityId, pEntityName)"));
    }

    #[test]
    fn test_column_query_is_scoped_to_database() {
        let q = MysqlDialect::new().column_exists_query("PersonReport", "age");
        assert!(q.sql.contains("TABLE_SCHEMA = DATABASE()"));
        assert_eq!(q.params.len(), 2);
        assert_eq!(
            MysqlDialect::new().add_column("PersonReport", "age INT"),
            "ALTER TABLE PersonReport ADD COLUMN age INT"
        );
    }
}
