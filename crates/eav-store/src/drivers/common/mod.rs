//! SQL builders shared by more than one dialect.

use crate::core::schema::{ColumnType, Upsert, UpsertDef};

/// `INSERT ... ON CONFLICT (...) DO UPDATE` as understood by SQLite and
/// PostgreSQL.
pub fn on_conflict_upsert(upsert: Upsert, values: &[String]) -> String {
    let def = upsert.def();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO",
        def.table.name,
        def.columns.join(", "),
        values.join(", "),
        def.key_columns.join(", ")
    );

    if def.update_columns.is_empty() {
        sql.push_str(" NOTHING");
    } else {
        let update_set = def
            .update_columns
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" UPDATE SET {}", update_set));
    }

    sql
}

/// Stored-procedure parameter name for a bound column.
pub fn procedure_param(column: &str) -> String {
    format!("p{}", column)
}

/// Procedure parameters of an upsert, with their logical types.
pub fn procedure_params(def: &UpsertDef) -> Vec<(String, ColumnType)> {
    def.columns
        .iter()
        .map(|c| {
            let column_type = def
                .table
                .column(c)
                .map(|col| col.column_type)
                .unwrap_or(ColumnType::Text);
            (procedure_param(c), column_type)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("${}", i)).collect()
    }

    #[test]
    fn test_on_conflict_upsert_updates_value() {
        let sql = on_conflict_upsert(Upsert::Text, &placeholders(3));
        assert_eq!(
            sql,
            "INSERT INTO StoreText (EntityGuid, FieldId, Value) VALUES ($1, $2, $3) \
             ON CONFLICT (EntityGuid, FieldId) DO UPDATE SET Value = EXCLUDED.Value"
        );
    }

    #[test]
    fn test_on_conflict_upsert_key_only() {
        let sql = on_conflict_upsert(Upsert::EntityFields, &placeholders(2));
        assert!(sql.ends_with("ON CONFLICT (EntityId, FieldId) DO NOTHING"));
    }

    #[test]
    fn test_overview_keeps_date_created() {
        let sql = on_conflict_upsert(Upsert::Overview, &placeholders(4));
        assert!(sql.contains("UPDATE SET DateModified = EXCLUDED.DateModified, EntityId = EXCLUDED.EntityId"));
        assert!(!sql.contains("DateCreated = EXCLUDED"));
    }

    #[test]
    fn test_procedure_params() {
        let params = procedure_params(Upsert::Long.def());
        assert_eq!(
            params,
            vec![
                ("pEntityGuid".to_string(), ColumnType::Guid),
                ("pFieldId".to_string(), ColumnType::BigInt),
                ("pValue".to_string(), ColumnType::BigInt),
            ]
        );
    }
}
