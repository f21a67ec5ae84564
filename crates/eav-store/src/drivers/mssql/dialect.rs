//! SQL Server (T-SQL) dialect (Strategy pattern).
//!
//! Upserts are `MERGE` statements, either sent directly or wrapped in a
//! stored procedure invoked with `EXEC`.

use crate::core::schema::{ColumnType, ComponentKind, Upsert};
use crate::core::traits::{Dialect, ExistsQuery};
use crate::core::value::SqlValue;
use crate::drivers::common::procedure_params;

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn param_placeholder(&self, index: usize) -> String {
        // MSSQL uses @P1, @P2, etc. (1-based)
        format!("@P{}", index)
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Guid => "NVARCHAR(96)",
            ColumnType::Name => "NVARCHAR(256)",
            ColumnType::Text => "NVARCHAR(MAX)",
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "REAL",
            ColumnType::Double => "FLOAT",
            ColumnType::Bool => "BIT",
            ColumnType::Blob => "VARBINARY(MAX)",
            ColumnType::DateTime => "DATETIME2(7)",
        }
    }

    fn exists_query(&self, kind: ComponentKind, name: &str) -> Option<ExistsQuery> {
        // COUNT(*) is INT on SQL Server; cast so every engine yields a BIGINT.
        let sql = match kind {
            ComponentKind::Table => {
                "SELECT CAST(COUNT(*) AS BIGINT) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1"
            }
            ComponentKind::StoredProcedure => {
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sysobjects WHERE name = @P1 AND xtype = 'P'"
            }
            ComponentKind::Trigger => {
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sysobjects WHERE name = @P1 AND xtype = 'TR'"
            }
            ComponentKind::Index => "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.indexes WHERE name = @P1",
        };
        Some(ExistsQuery {
            sql: sql.to_string(),
            params: vec![SqlValue::from(name.to_string())],
        })
    }

    fn column_exists_query(&self, table: &str, column: &str) -> ExistsQuery {
        ExistsQuery {
            sql: "SELECT CAST(COUNT(*) AS BIGINT) FROM INFORMATION_SCHEMA.COLUMNS \
                  WHERE TABLE_NAME = @P1 AND COLUMN_NAME = @P2"
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

    // T-SQL has no COLUMN keyword after ADD.
    fn add_column(&self, table: &str, column_definition: &str) -> String {
        format!("ALTER TABLE {} ADD {}", table, column_definition)
    }

    fn liveness_query(&self) -> &'static str {
        "SELECT CAST(1 AS BIGINT)"
    }

    fn build_upsert_with(&self, upsert: Upsert, values: &[String]) -> String {
        let def = upsert.def();
        let target_alias = "t";
        let source_alias = "s";

        let source_cols = def
            .columns
            .iter()
            .zip(values)
            .map(|(c, v)| format!("{} AS {}", v, c))
            .collect::<Vec<_>>()
            .join(", ");

        let join_condition = def
            .key_columns
            .iter()
            .map(|c| format!("{}.{} = {}.{}", target_alias, c, source_alias, c))
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut sql = format!(
            "MERGE {} WITH (HOLDLOCK) AS {} USING (SELECT {}) AS {} ON {}",
            def.table.name, target_alias, source_cols, source_alias, join_condition
        );

        if !def.update_columns.is_empty() {
            let update_set = def
                .update_columns
                .iter()
                .map(|c| format!("{}.{} = {}.{}", target_alias, c, source_alias, c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", update_set));
        }

        let insert_vals = def
            .columns
            .iter()
            .map(|c| format!("{}.{}", source_alias, c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            def.columns.join(", "),
            insert_vals
        ));

        // MSSQL MERGE requires semicolon terminator
        sql.push(';');

        sql
    }

    fn build_call(&self, upsert: Upsert) -> Option<String> {
        let params = self.placeholders(1, upsert.def().columns.len());
        Some(format!("EXEC {} {}", upsert.procedure_name(), params.join(", ")))
    }

    fn create_procedure(&self, upsert: Upsert) -> Option<String> {
        let params = procedure_params(upsert.def());
        let signature = params
            .iter()
            .map(|(name, ty)| format!("@{} {}", name, self.column_type(*ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let names: Vec<String> = params.iter().map(|(name, _)| format!("@{}", name)).collect();

        Some(format!(
            "CREATE PROCEDURE {} {}\nAS\nBEGIN\n    SET NOCOUNT ON;\n    {}\nEND",
            upsert.procedure_name(),
            signature,
            self.build_upsert_with(upsert, &names)
        ))
    }

    fn create_cascade_trigger(&self) -> String {
        "CREATE TRIGGER CascadeEntityBinding ON StoreEntityOverview AFTER DELETE\nAS\nBEGIN\n    \
         SET NOCOUNT ON;\n    \
         DELETE FROM StoreEntityBinding WHERE ParentEntityGuid IN (SELECT EntityGuid FROM deleted);\n\
         END"
            .to_string()
    }
}
