//! Field definitions and the read-only field catalog.
//!
//! Fields are discovered by the caller's mapping layer and handed to the
//! engine as a [`FieldCatalog`]. A field id is unique and stable across every
//! entity type that uses it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::schema;
use crate::error::{Result, StoreError};

/// Stable numeric identifier of a field.
pub type FieldId = i64;

/// Declared value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    Text,
    Blob,
    DateTime,
    Date,
    ZonedDateTime,
    Time,
    Enum,
    TextArray,
    IntegerArray,
    LongArray,
    FloatArray,
    DoubleArray,
    DateTimeArray,
    Entity,
    EntityArray,
}

impl FieldType {
    /// Every field type, in type-id order.
    pub const ALL: [FieldType; 20] = [
        FieldType::Boolean,
        FieldType::Integer,
        FieldType::Long,
        FieldType::Float,
        FieldType::Double,
        FieldType::Text,
        FieldType::Blob,
        FieldType::DateTime,
        FieldType::Date,
        FieldType::ZonedDateTime,
        FieldType::Time,
        FieldType::Enum,
        FieldType::TextArray,
        FieldType::IntegerArray,
        FieldType::LongArray,
        FieldType::FloatArray,
        FieldType::DoubleArray,
        FieldType::DateTimeArray,
        FieldType::Entity,
        FieldType::EntityArray,
    ];

    /// Identifier persisted in `RefFieldTypes`.
    pub fn type_id(self) -> i32 {
        match self {
            FieldType::Boolean => 1,
            FieldType::Integer => 2,
            FieldType::Long => 3,
            FieldType::Float => 4,
            FieldType::Double => 5,
            FieldType::Text => 6,
            FieldType::Blob => 7,
            FieldType::DateTime => 8,
            FieldType::Date => 9,
            FieldType::ZonedDateTime => 10,
            FieldType::Time => 11,
            FieldType::Enum => 12,
            FieldType::TextArray => 13,
            FieldType::IntegerArray => 14,
            FieldType::LongArray => 15,
            FieldType::FloatArray => 16,
            FieldType::DoubleArray => 17,
            FieldType::DateTimeArray => 18,
            FieldType::Entity => 19,
            FieldType::EntityArray => 20,
        }
    }

    /// Name persisted in `RefFieldTypes`.
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Boolean => "Boolean",
            FieldType::Integer => "Integer",
            FieldType::Long => "Long",
            FieldType::Float => "Float",
            FieldType::Double => "Double",
            FieldType::Text => "Text",
            FieldType::Blob => "Blob",
            FieldType::DateTime => "DateTime",
            FieldType::Date => "Date",
            FieldType::ZonedDateTime => "ZonedDateTime",
            FieldType::Time => "Time",
            FieldType::Enum => "Enum",
            FieldType::TextArray => "TextArray",
            FieldType::IntegerArray => "IntegerArray",
            FieldType::LongArray => "LongArray",
            FieldType::FloatArray => "FloatArray",
            FieldType::DoubleArray => "DoubleArray",
            FieldType::DateTimeArray => "DateTimeArray",
            FieldType::Entity => "Entity",
            FieldType::EntityArray => "EntityArray",
        }
    }

    /// Value table holding fields of this type, `None` for object references.
    pub fn value_table(self) -> Option<&'static schema::TableDef> {
        let table = match self {
            FieldType::Boolean => &schema::STORE_BOOLEAN,
            FieldType::Integer => &schema::STORE_INTEGER,
            FieldType::Long => &schema::STORE_LONG,
            FieldType::Float => &schema::STORE_FLOAT,
            FieldType::Double => &schema::STORE_DOUBLE,
            FieldType::Text => &schema::STORE_TEXT,
            FieldType::Blob => &schema::STORE_BLOB,
            FieldType::DateTime | FieldType::Date => &schema::STORE_DATE_TIME,
            FieldType::ZonedDateTime => &schema::STORE_ZONED_DATE_TIME,
            FieldType::Time => &schema::STORE_TIME,
            FieldType::Enum | FieldType::IntegerArray => &schema::STORE_INTEGER_ARRAY,
            FieldType::TextArray => &schema::STORE_TEXT_ARRAY,
            FieldType::LongArray => &schema::STORE_LONG_ARRAY,
            FieldType::FloatArray => &schema::STORE_FLOAT_ARRAY,
            FieldType::DoubleArray => &schema::STORE_DOUBLE_ARRAY,
            FieldType::DateTimeArray => &schema::STORE_DATE_TIME_ARRAY,
            FieldType::Entity | FieldType::EntityArray => return None,
        };
        Some(table)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed attribute definition shared across entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(id: FieldId, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
        }
    }
}

/// An enumeration bound to a field. A value's position is its persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEnum {
    pub field: Field,
    pub values: Vec<String>,
}

impl FieldEnum {
    pub fn new<I, S>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Ordinal of `value` within the declared values.
    pub fn ordinal_of(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }

    /// Declared value at `ordinal`.
    pub fn value_at(&self, ordinal: usize) -> Option<&str> {
        self.values.get(ordinal).map(String::as_str)
    }
}

/// Read-only catalog of fields and enums, consulted during saves.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: BTreeMap<FieldId, Field>,
    enums: BTreeMap<FieldId, FieldEnum>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Re-adding an identical definition is a no-op.
    pub fn register(&mut self, field: Field) -> Result<()> {
        if let Some(existing) = self.fields.get(&field.id) {
            if existing != &field {
                return Err(StoreError::FieldRebound {
                    field_id: field.id,
                    existing: format!("{} ({})", existing.name, existing.field_type),
                    requested: format!("{} ({})", field.name, field.field_type),
                });
            }
            return Ok(());
        }
        self.fields.insert(field.id, field);
        Ok(())
    }

    /// Add an enum together with its owning field.
    pub fn register_enum(&mut self, field_enum: FieldEnum) -> Result<()> {
        self.register(field_enum.field.clone())?;
        self.enums.insert(field_enum.field.id, field_enum);
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_field(mut self, field: Field) -> Result<Self> {
        self.register(field)?;
        Ok(self)
    }

    /// Builder-style variant of [`register_enum`](Self::register_enum).
    pub fn with_enum(mut self, field_enum: FieldEnum) -> Result<Self> {
        self.register_enum(field_enum)?;
        Ok(self)
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(&id)
    }

    pub fn enum_for(&self, id: FieldId) -> Option<&FieldEnum> {
        self.enums.get(&id)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn enums(&self) -> impl Iterator<Item = &FieldEnum> {
        self.enums.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids_are_unique() {
        let mut ids: Vec<i32> = FieldType::ALL.iter().map(|t| t.type_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), FieldType::ALL.len());
    }

    #[test]
    fn test_register_same_field_twice_is_ok() {
        let mut catalog = FieldCatalog::new();
        catalog.register(Field::new(1, "name", FieldType::Text)).unwrap();
        catalog.register(Field::new(1, "name", FieldType::Text)).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_rebinding_field_id_fails() {
        let mut catalog = FieldCatalog::new();
        catalog.register(Field::new(1, "name", FieldType::Text)).unwrap();
        let err = catalog
            .register(Field::new(1, "age", FieldType::Integer))
            .unwrap_err();
        assert!(matches!(err, StoreError::FieldRebound { field_id: 1, .. }));
    }

    #[test]
    fn test_enum_ordinals() {
        let colour = FieldEnum::new(Field::new(9, "colour", FieldType::Enum), ["RED", "GREEN", "BLUE"]);
        assert_eq!(colour.ordinal_of("BLUE"), Some(2));
        assert_eq!(colour.ordinal_of("PINK"), None);
        assert_eq!(colour.value_at(1), Some("GREEN"));
    }

    #[test]
    fn test_value_tables() {
        assert_eq!(FieldType::Date.value_table().unwrap().name, "StoreDateTime");
        assert_eq!(FieldType::Enum.value_table().unwrap().name, "StoreIntegerArray");
        assert!(FieldType::EntityArray.value_table().is_none());
    }
}
