//! Entity type registration.
//!
//! Persists what the reflection layer discovered about one entity type:
//! its name, its fields with their types, and its enums with their ordered
//! values.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::core::entity::EntityId;
use crate::core::field::{Field, FieldEnum, FieldType};
use crate::core::schema::Upsert;
use crate::core::traits::DbConnection;
use crate::core::value::{Row, SqlValue};
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Description of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub entity_id: EntityId,
    pub name: String,
    pub fields: Vec<Field>,
    pub enums: Vec<FieldEnum>,
}

impl EntityDescriptor {
    pub fn new(entity_id: EntityId, name: impl Into<String>) -> Self {
        Self {
            entity_id,
            name: name.into(),
            fields: Vec::new(),
            enums: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn enumeration(mut self, field_enum: FieldEnum) -> Self {
        self.enums.push(field_enum);
        self
    }

    /// Every field, including the fields owning enums, without duplicates.
    fn all_fields(&self) -> Vec<&Field> {
        let mut by_id: BTreeMap<i64, &Field> = BTreeMap::new();
        for field in self.fields.iter().chain(self.enums.iter().map(|e| &e.field)) {
            by_id.entry(field.id).or_insert(field);
        }
        by_id.into_values().collect()
    }

    fn field_types(&self) -> Vec<FieldType> {
        let mut types: Vec<FieldType> = self.all_fields().iter().map(|f| f.field_type).collect();
        types.sort_by_key(|t| t.type_id());
        types.dedup();
        types
    }
}

impl Database {
    /// Persist an entity type's registry rows in one transaction.
    pub async fn register(&self, descriptor: &EntityDescriptor) -> Result<()> {
        let mut conn = self.connect().await?;
        conn.begin().await?;

        let result = self.write_registration(conn.as_mut(), descriptor).await;
        let result = match result {
            Ok(()) => conn.commit().await,
            Err(e) => {
                conn.rollback().await.ok();
                Err(e)
            }
        };
        conn.release().await;

        match result {
            Ok(()) => {
                info!(
                    "Registered entity {} ({}) with {} fields",
                    descriptor.name,
                    descriptor.entity_id,
                    descriptor.all_fields().len()
                );
                Ok(())
            }
            Err(e) => Err(StoreError::batch_write(
                format!("registration of {}", descriptor.name),
                e.to_string(),
            )),
        }
    }

    async fn write_registration(
        &self,
        conn: &mut dyn DbConnection,
        descriptor: &EntityDescriptor,
    ) -> Result<()> {
        let entity_id = descriptor.entity_id;
        let fields = descriptor.all_fields();

        let type_rows: Vec<Row> = descriptor
            .field_types()
            .into_iter()
            .map(|t| vec![SqlValue::I32(t.type_id()), SqlValue::from(t.name())])
            .collect();
        self.upsert_rows(conn, Upsert::FieldTypes, &type_rows).await?;

        let field_rows: Vec<Row> = fields
            .iter()
            .map(|f| {
                vec![
                    SqlValue::I64(f.id),
                    SqlValue::from(f.name.as_str()),
                    SqlValue::I32(f.field_type.type_id()),
                ]
            })
            .collect();
        self.upsert_rows(conn, Upsert::FieldNames, &field_rows).await?;

        let name_row = vec![SqlValue::I64(entity_id), SqlValue::from(descriptor.name.as_str())];
        self.upsert_rows(conn, Upsert::EntityName, &[name_row]).await?;

        let binding_rows: Vec<Row> = fields
            .iter()
            .map(|f| vec![SqlValue::I64(entity_id), SqlValue::I64(f.id)])
            .collect();
        self.upsert_rows(conn, Upsert::EntityFields, &binding_rows)
            .await?;

        let enum_rows: Vec<Row> = descriptor
            .enums
            .iter()
            .map(|e| vec![SqlValue::I64(entity_id), SqlValue::I64(e.field.id)])
            .collect();
        self.upsert_rows(conn, Upsert::EntityEnums, &enum_rows).await?;

        let value_rows: Vec<Row> = descriptor
            .enums
            .iter()
            .flat_map(|e| {
                e.values.iter().enumerate().map(move |(i, v)| {
                    vec![
                        SqlValue::I64(e.field.id),
                        SqlValue::I32(i as i32),
                        SqlValue::from(v.as_str()),
                    ]
                })
            })
            .collect();
        self.upsert_rows(conn, Upsert::EnumValues, &value_rows).await?;

        Ok(())
    }

    async fn upsert_rows(
        &self,
        conn: &mut dyn DbConnection,
        upsert: Upsert,
        rows: &[Row<'_>],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = self.upsert_statement_for(upsert);
        debug!("{:?}: {} rows", upsert, rows.len());
        conn.execute_batch(&sql, rows).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_collects_enum_fields() {
        let status = Field::new(3, "status", FieldType::Enum);
        let descriptor = EntityDescriptor::new(1, "Order")
            .field(Field::new(1, "name", FieldType::Text))
            .field(Field::new(2, "total", FieldType::Double))
            .enumeration(FieldEnum::new(status, ["NEW", "PAID"]));

        let ids: Vec<i64> = descriptor.all_fields().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(descriptor.field_types().len(), 3);
    }

    #[test]
    fn test_descriptor_dedupes_field_types() {
        let descriptor = EntityDescriptor::new(1, "Person")
            .field(Field::new(1, "first", FieldType::Text))
            .field(Field::new(2, "last", FieldType::Text));
        assert_eq!(descriptor.field_types(), vec![FieldType::Text]);
    }
}
