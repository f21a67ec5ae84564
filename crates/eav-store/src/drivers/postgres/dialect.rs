//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Unquoted identifiers fold to lower case, so catalog lookups compare
//! against lower-cased component names.

use crate::core::schema::{ColumnType, ComponentKind, Upsert};
use crate::core::traits::{Dialect, ExistsQuery};
use crate::core::value::SqlValue;
use crate::drivers::common::{on_conflict_upsert, procedure_params};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn param_placeholder(&self, index: usize) -> String {
        // PostgreSQL uses $1, $2, etc. (1-based)
        format!("${}", index)
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Guid => "VARCHAR(96)",
            ColumnType::Name => "VARCHAR(256)",
            ColumnType::Text => "TEXT",
            ColumnType::Int => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "REAL",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Blob => "BYTEA",
            ColumnType::DateTime => "TIMESTAMP",
        }
    }

    fn exists_query(&self, kind: ComponentKind, name: &str) -> Option<ExistsQuery> {
        let sql = match kind {
            ComponentKind::Table => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1::text"
            }
            ComponentKind::StoredProcedure => "SELECT COUNT(*) FROM pg_proc WHERE proname = $1::text",
            ComponentKind::Trigger => {
                "SELECT COUNT(*) FROM information_schema.triggers WHERE trigger_name = $1::text"
            }
            ComponentKind::Index => {
                "SELECT COUNT(*) FROM pg_indexes \
                 WHERE schemaname = current_schema() AND indexname = $1::text"
            }
        };
        Some(ExistsQuery {
            sql: sql.to_string(),
            params: vec![SqlValue::from(name.to_lowercase())],
        })
    }

    fn column_exists_query(&self, table: &str, column: &str) -> ExistsQuery {
        ExistsQuery {
            sql: "SELECT COUNT(*) FROM information_schema.columns \
                  WHERE table_schema = current_schema() AND table_name = $1::text AND column_name = $2::text"
                .to_string(),
            params: vec![
                SqlValue::from(table.to_lowercase()),
                SqlValue::from(column.to_lowercase()),
            ],
        }
    }

    fn supports_callable_statements(&self) -> bool {
        true
    }

    fn liveness_query(&self) -> &'static str {
        "SELECT 1::bigint"
    }

    fn build_upsert_with(&self, upsert: Upsert, values: &[String]) -> String {
        on_conflict_upsert(upsert, values)
    }

    fn build_call(&self, upsert: Upsert) -> Option<String> {
        let params = self.placeholders(1, upsert.def().columns.len());
        Some(format!("CALL {}({})", upsert.procedure_name(), params.join(", ")))
    }

    fn create_procedure(&self, upsert: Upsert) -> Option<String> {
        let params = procedure_params(upsert.def());
        let signature = params
            .iter()
            .map(|(name, ty)| format!("{} {}", name, self.column_type(*ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let names: Vec<String> = params.into_iter().map(|(name, _)| name).collect();

        Some(format!(
            "CREATE OR REPLACE PROCEDURE {}({})\nLANGUAGE plpgsql\nAS $$\nBEGIN\n    {};\nEND;\n$$",
            upsert.procedure_name(),
            signature,
            self.build_upsert_with(upsert, &names)
        ))
    }

    fn create_cascade_trigger(&self) -> String {
        "CREATE OR REPLACE FUNCTION fnCascadeEntityBinding() RETURNS TRIGGER\n\
         LANGUAGE plpgsql\nAS $$\nBEGIN\n    \
         DELETE FROM StoreEntityBinding WHERE ParentEntityGuid = OLD.EntityGuid;\n    \
         RETURN OLD;\nEND;\n$$;\n\
         CREATE TRIGGER CascadeEntityBinding AFTER DELETE ON StoreEntityOverview \
         FOR EACH ROW EXECUTE FUNCTION fnCascadeEntityBinding();"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::STORE_BLOB;

    #[test]
    fn test_param_placeholder() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.param_placeholder(1), "$1");
        assert_eq!(dialect.param_placeholder(12), "$12");
    }

    #[test]
    fn test_exists_query_lowercases_name() {
        let q = PostgresDialect::new()
            .exists_query(ComponentKind::Table, "StoreText")
            .unwrap();
        assert!(q.sql.contains("information_schema.tables"));
        assert_eq!(q.params, vec![SqlValue::from("storetext".to_string())]);
    }

    #[test]
    fn test_procedure_lookup_uses_pg_proc() {
        let q = PostgresDialect::new()
            .exists_query(ComponentKind::StoredProcedure, "procStoreText")
            .unwrap();
        assert!(q.sql.contains("pg_proc"));
    }

    #[test]
    fn test_create_blob_table() {
        let sql = PostgresDialect::new().create_table(&STORE_BLOB);
        assert!(sql.contains("EntityGuid VARCHAR(96) NOT NULL"));
        assert!(sql.contains("Value BYTEA"));
    }

    #[test]
    fn test_build_call() {
        let sql = PostgresDialect::new().build_call(Upsert::Overview).unwrap();
        assert_eq!(sql, "CALL procStoreEntityOverview($1, $2, $3, $4)");
    }

    #[test]
    fn test_create_procedure_uses_named_params() {
        let sql = PostgresDialect::new().create_procedure(Upsert::Text).unwrap();
        assert!(sql.starts_with("CREATE OR REPLACE PROCEDURE procStoreText(pEntityGuid VARCHAR(96), pFieldId BIGINT, pValue TEXT)"));
        assert!(sql.contains("VALUES (pEntityGuid, pFieldId, pValue)"));
        assert!(sql.contains("LANGUAGE plpgsql"));
    }

    #[test]
    fn test_column_query_folds_case() {
        let q = PostgresDialect::new().column_exists_query("PersonReport", "DateModified");
        assert!(q.sql.contains("information_schema.columns"));
        assert_eq!(
            q.params,
            vec![SqlValue::from("personreport".to_string()), SqlValue::from("datemodified".to_string())]
        );
    }
}
