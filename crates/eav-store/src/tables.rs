//! Flat reporting tables.
//!
//! A [`ReportTable`] projects selected fields of selected entity types into
//! one conventional table with a column per field, so reporting tools can
//! read saved entities without pivoting the EAV tables. Tables are created,
//! and widened with `ALTER TABLE ... ADD` when fields are added, by
//! [`Database::initialize`](crate::Database::initialize). Every save writes
//! one row per matching entity.
//!
//! Column mapping (columns are ordered by name after the fixed ones):
//!
//! | field type            | column                                   |
//! |-----------------------|------------------------------------------|
//! | scalar                | its value, in the stored encoding        |
//! | enum                  | one boolean `<name>_<ordinal>` per value |
//! | entity                | the referenced child's GUID              |
//! | blob, arrays, entity arrays | not projected                      |

use std::collections::BTreeSet;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::bootstrap::{BootstrapFailure, BootstrapReport};
use crate::core::entity::{Entity, EntityId};
use crate::core::field::{FieldCatalog, FieldId, FieldType};
use crate::core::schema::{ColumnType, ComponentKind};
use crate::core::traits::{DbConnection, Dialect};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Which existing rows a save replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueBy {
    /// One row per entity; `EntityGuid` is the primary key.
    Guid,
    /// One row per parent; rows of the entity's parent are deleted first.
    ParentGuid,
}

impl UniqueBy {
    fn column(self) -> &'static str {
        match self {
            UniqueBy::Guid => "EntityGuid",
            UniqueBy::ParentGuid => "ParentEntityGuid",
        }
    }
}

/// Columns present in every report table, in insert order.
const FIXED_COLUMNS: [(&str, ColumnType, bool); 4] = [
    ("EntityGuid", ColumnType::Guid, false),
    ("EntityId", ColumnType::BigInt, false),
    ("ParentEntityGuid", ColumnType::Guid, true),
    ("DateModified", ColumnType::DateTime, true),
];

/// A reporting table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTable {
    pub name: String,
    /// Entity types written to the table; empty accepts every type.
    #[serde(default)]
    pub entities: BTreeSet<EntityId>,
    /// Fields projected into columns.
    #[serde(default)]
    pub fields: BTreeSet<FieldId>,
    /// Replace rows on re-save instead of appending.
    #[serde(default)]
    pub unique_by: Option<UniqueBy>,
}

/// One projected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportColumn {
    pub name: String,
    pub column_type: ColumnType,
    source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Value(FieldId, FieldType),
    /// Whether the entity holds this declared value.
    EnumValue(FieldId, String),
    Child(FieldId),
}

impl ReportTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: BTreeSet::new(),
            fields: BTreeSet::new(),
            unique_by: None,
        }
    }

    pub fn entity(mut self, entity_id: EntityId) -> Self {
        self.entities.insert(entity_id);
        self
    }

    pub fn field(mut self, field_id: FieldId) -> Self {
        self.fields.insert(field_id);
        self
    }

    pub fn unique_by(mut self, unique_by: UniqueBy) -> Self {
        self.unique_by = Some(unique_by);
        self
    }

    /// Whether entities of `entity_id` are written to this table.
    pub fn accepts(&self, entity_id: EntityId) -> bool {
        self.entities.is_empty() || self.entities.contains(&entity_id)
    }

    /// Projected columns, sorted by name. Fields missing from the catalog
    /// and unprojectable types are skipped.
    pub fn columns(&self, catalog: &FieldCatalog) -> Vec<ReportColumn> {
        let mut columns = Vec::new();
        for &field_id in &self.fields {
            let Some(field) = catalog.field(field_id) else {
                warn!(
                    "Report table {} names field {} which is not in the catalog",
                    self.name, field_id
                );
                continue;
            };
            let base = column_name(&field.name);
            let scalar = |column_type| ReportColumn {
                name: base.clone(),
                column_type,
                source: Source::Value(field.id, field.field_type),
            };
            match field.field_type {
                FieldType::Boolean => columns.push(scalar(ColumnType::Bool)),
                FieldType::Integer | FieldType::Time => columns.push(scalar(ColumnType::Int)),
                FieldType::Long | FieldType::ZonedDateTime => columns.push(scalar(ColumnType::BigInt)),
                FieldType::Float => columns.push(scalar(ColumnType::Float)),
                FieldType::Double => columns.push(scalar(ColumnType::Double)),
                FieldType::Text => columns.push(scalar(ColumnType::Text)),
                FieldType::DateTime | FieldType::Date => columns.push(scalar(ColumnType::DateTime)),
                FieldType::Enum => {
                    let Some(field_enum) = catalog.enum_for(field.id) else {
                        continue;
                    };
                    columns.extend(field_enum.values.iter().enumerate().map(|(ordinal, value)| {
                        ReportColumn {
                            name: format!("{}_{}", base, ordinal),
                            column_type: ColumnType::Bool,
                            source: Source::EnumValue(field.id, value.clone()),
                        }
                    }));
                }
                FieldType::Entity => columns.push(ReportColumn {
                    name: base.clone(),
                    column_type: ColumnType::Guid,
                    source: Source::Child(field.id),
                }),
                FieldType::Blob
                | FieldType::TextArray
                | FieldType::IntegerArray
                | FieldType::LongArray
                | FieldType::FloatArray
                | FieldType::DoubleArray
                | FieldType::DateTimeArray
                | FieldType::EntityArray => {}
            }
        }
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        columns
    }

    /// CREATE TABLE with the fixed columns only; field columns are added
    /// afterwards with [`add_column_sql`](Self::add_column_sql).
    pub fn create_sql(&self, dialect: &dyn Dialect) -> String {
        let mut parts: Vec<String> = FIXED_COLUMNS
            .iter()
            .map(|(name, column_type, nullable)| dialect.column_definition(name, *column_type, *nullable))
            .collect();
        if self.unique_by == Some(UniqueBy::Guid) {
            parts.push("PRIMARY KEY (EntityGuid)".to_string());
        }
        format!("CREATE TABLE {} ({})", self.name, parts.join(", "))
    }

    pub fn add_column_sql(&self, dialect: &dyn Dialect, column: &ReportColumn) -> String {
        let definition = dialect.column_definition(&column.name, column.column_type, true);
        dialect.add_column(&self.name, &definition)
    }

    pub fn insert_sql(&self, dialect: &dyn Dialect, columns: &[ReportColumn]) -> String {
        let names: Vec<&str> = FIXED_COLUMNS
            .iter()
            .map(|(name, _, _)| *name)
            .chain(columns.iter().map(|c| c.name.as_str()))
            .collect();
        dialect.build_insert(&self.name, &names)
    }

    pub fn delete_sql(&self, dialect: &dyn Dialect, by: UniqueBy) -> String {
        dialect.build_delete(&self.name, &[by.column()])
    }

    /// Insert parameters for `entity`, matching [`insert_sql`](Self::insert_sql).
    pub fn row<'a>(&self, entity: &'a Entity, parent: Option<&str>, columns: &[ReportColumn]) -> Row<'a> {
        let p = &entity.properties;
        let mut row = vec![
            SqlValue::text_borrowed(entity.guid()),
            SqlValue::I64(entity.entity_id()),
            parent.map_or(SqlValue::Null(SqlNullType::String), |g| SqlValue::from(g.to_string())),
            SqlValue::DateTime(entity.overview.date_modified),
        ];
        for column in columns {
            let value = match &column.source {
                Source::Value(id, field_type) => match field_type {
                    FieldType::Boolean => p.booleans.get(id).map(|v| SqlValue::Bool(*v)),
                    FieldType::Integer => p.integers.get(id).map(|v| SqlValue::I32(*v)),
                    FieldType::Long => p.longs.get(id).map(|v| SqlValue::I64(*v)),
                    FieldType::Float => p.floats.get(id).map(|v| SqlValue::F32(*v)),
                    FieldType::Double => p.doubles.get(id).map(|v| SqlValue::F64(*v)),
                    FieldType::Text => p.strings.get(id).map(|v| SqlValue::text_borrowed(v)),
                    FieldType::DateTime => p.date_times.get(id).map(|v| SqlValue::DateTime(*v)),
                    FieldType::Date => p
                        .dates
                        .get(id)
                        .map(|v| SqlValue::DateTime(v.and_time(NaiveTime::MIN))),
                    FieldType::ZonedDateTime => {
                        p.zoned_date_times.get(id).map(|v| SqlValue::I64(v.timestamp()))
                    }
                    FieldType::Time => p
                        .times
                        .get(id)
                        .map(|v| SqlValue::I32(v.num_seconds_from_midnight() as i32)),
                    _ => None,
                },
                Source::EnumValue(id, declared) => p
                    .enums
                    .get(id)
                    .map(|held| SqlValue::Bool(held.contains(declared))),
                Source::Child(id) => p
                    .objects
                    .get(id)
                    .and_then(|o| o.value.as_ref())
                    .map(|child| SqlValue::text_borrowed(child.guid())),
            };
            row.push(value.unwrap_or(SqlValue::Null(null_type(column.column_type))));
        }
        row
    }
}

impl Database {
    /// Add a report table. Fails when its name is not a plain identifier or
    /// is already taken.
    pub fn with_report_table(mut self, table: ReportTable) -> Result<Self> {
        self.config_mut().report_tables.push(table);
        self.config().validate()?;
        Ok(self)
    }

    pub fn report_tables(&self) -> &[ReportTable] {
        &self.config().report_tables
    }

    /// Create missing report tables and add missing columns.
    ///
    /// Also run by [`initialize`](Database::initialize).
    pub async fn sync_report_tables(&self) -> Result<BootstrapReport> {
        let mut conn = self.connect().await?;
        let mut report = BootstrapReport::default();
        self.sync_report_tables_on(conn.as_mut(), &mut report).await;
        conn.release().await;
        Ok(report)
    }

    pub(crate) async fn sync_report_tables_on(
        &self,
        conn: &mut dyn DbConnection,
        report: &mut BootstrapReport,
    ) {
        for table in self.report_tables() {
            match self.sync_report_table(conn, table).await {
                Ok(changes) if changes.is_empty() => {
                    debug!("Report table {} is up to date", table.name);
                    report.existing.push(table.name.clone());
                }
                Ok(changes) => {
                    info!("Updated report table {}: {}", table.name, changes.join(", "));
                    report.created.extend(changes);
                }
                Err(e) => {
                    error!("Failed to sync report table {}: {}", table.name, e);
                    report.failed.push(BootstrapFailure {
                        component: table.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Returns what was created: the table and/or `table.column` entries.
    async fn sync_report_table(
        &self,
        conn: &mut dyn DbConnection,
        table: &ReportTable,
    ) -> Result<Vec<String>> {
        let dialect = self.dialect();
        let mut changes = Vec::new();

        if !self
            .component_exists_on(conn, ComponentKind::Table, &table.name)
            .await?
        {
            conn.execute_script(&table.create_sql(dialect))
                .await
                .map_err(|e| StoreError::bootstrap(&table.name, e.to_string()))?;
            changes.push(table.name.clone());
        }

        // One column per statement; SQLite cannot add several at once.
        for column in table.columns(self.catalog()) {
            let query = dialect.column_exists_query(&table.name, &column.name);
            if conn.query_i64(&query.sql, &query.params).await?.unwrap_or(0) > 0 {
                continue;
            }
            conn.execute_script(&table.add_column_sql(dialect, &column))
                .await
                .map_err(|e| StoreError::bootstrap(&table.name, e.to_string()))?;
            changes.push(format!("{}.{}", table.name, column.name));
        }
        Ok(changes)
    }

    /// Delete the rows of report table `table` whose GUID (or parent GUID)
    /// is `guid`. Returns rows deleted.
    pub async fn delete_report_rows(&self, table: &str, by: UniqueBy, guid: &str) -> Result<u64> {
        let table = self
            .report_tables()
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table))
            .ok_or_else(|| StoreError::Query(format!("report table '{}' is not configured", table)))?;

        let mut conn = self.connect().await?;
        let deleted = conn
            .execute(&table.delete_sql(self.dialect(), by), &[SqlValue::from(guid)])
            .await;
        conn.release().await;
        deleted
    }
}

fn null_type(column_type: ColumnType) -> SqlNullType {
    match column_type {
        ColumnType::Bool => SqlNullType::Bool,
        ColumnType::Int => SqlNullType::I32,
        ColumnType::BigInt => SqlNullType::I64,
        ColumnType::Float => SqlNullType::F32,
        ColumnType::Double => SqlNullType::F64,
        ColumnType::Blob => SqlNullType::Bytes,
        ColumnType::DateTime => SqlNullType::DateTime,
        ColumnType::Guid | ColumnType::Name | ColumnType::Text => SqlNullType::String,
    }
}

/// Field name as a bare SQL identifier.
fn column_name(field_name: &str) -> String {
    field_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Whether `name` can be used unquoted as a table name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::ObjectProperty;
    use crate::core::field::{Field, FieldEnum};
    use crate::drivers::{MssqlDialect, SqliteDialect};
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn catalog() -> FieldCatalog {
        FieldCatalog::new()
            .with_field(Field::new(1, "name", FieldType::Text))
            .and_then(|c| c.with_field(Field::new(2, "age", FieldType::Integer)))
            .and_then(|c| c.with_field(Field::new(3, "photo", FieldType::Blob)))
            .and_then(|c| c.with_field(Field::new(4, "tags", FieldType::TextArray)))
            .and_then(|c| c.with_field(Field::new(5, "born", FieldType::Date)))
            .and_then(|c| c.with_field(Field::new(6, "last seen", FieldType::ZonedDateTime)))
            .and_then(|c| c.with_field(Field::new(7, "home", FieldType::Entity)))
            .and_then(|c| {
                c.with_enum(FieldEnum::new(
                    Field::new(8, "status", FieldType::Enum),
                    ["ACTIVE", "RETIRED"],
                ))
            })
            .unwrap()
    }

    fn people() -> ReportTable {
        (1..=8).fold(ReportTable::new("PersonReport").entity(1), |t, f| t.field(f))
    }

    #[test]
    fn test_columns_are_sorted_and_typed() {
        let columns = people().columns(&catalog());
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["age", "born", "home", "last_seen", "name", "status_0", "status_1"]
        );
        let types: Vec<ColumnType> = columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Int,
                ColumnType::DateTime,
                ColumnType::Guid,
                ColumnType::BigInt,
                ColumnType::Text,
                ColumnType::Bool,
                ColumnType::Bool,
            ]
        );
    }

    #[test]
    fn test_unregistered_fields_are_skipped() {
        let table = ReportTable::new("R").field(1).field(99);
        assert_eq!(table.columns(&catalog()).len(), 1);
    }

    #[test]
    fn test_create_sql_keys_unique_tables_by_guid() {
        let dialect = SqliteDialect::new();
        let plain = people().create_sql(&dialect);
        assert_eq!(
            plain,
            "CREATE TABLE PersonReport (EntityGuid TEXT NOT NULL, EntityId BIGINT NOT NULL, \
             ParentEntityGuid TEXT, DateModified TIMESTAMP)"
        );
        let unique = people().unique_by(UniqueBy::Guid).create_sql(&dialect);
        assert!(unique.ends_with(", PRIMARY KEY (EntityGuid))"));
        let by_parent = people().unique_by(UniqueBy::ParentGuid).create_sql(&dialect);
        assert!(!by_parent.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_add_column_follows_dialect() {
        let table = people();
        let columns = table.columns(&catalog());
        let age = &columns[0];
        assert_eq!(
            table.add_column_sql(&SqliteDialect::new(), age),
            "ALTER TABLE PersonReport ADD COLUMN age INTEGER"
        );
        assert!(table
            .add_column_sql(&MssqlDialect::new(), age)
            .starts_with("ALTER TABLE PersonReport ADD age "));
    }

    #[test]
    fn test_insert_and_delete_sql() {
        let dialect = SqliteDialect::new();
        let table = ReportTable::new("R").field(1).field(2);
        let columns = table.columns(&catalog());
        assert_eq!(
            table.insert_sql(&dialect, &columns),
            "INSERT INTO R (EntityGuid, EntityId, ParentEntityGuid, DateModified, age, name) \
             VALUES (?, ?, ?, ?, ?, ?)"
        );
        assert_eq!(
            table.delete_sql(&dialect, UniqueBy::ParentGuid),
            "DELETE FROM R WHERE ParentEntityGuid = ?"
        );
    }

    #[test]
    fn test_row_uses_stored_encodings() {
        let mut entity = Entity::with_guid(1, "p1");
        let p = &mut entity.properties;
        p.strings.insert(1, "Ada".into());
        p.dates.insert(5, NaiveDate::from_ymd_opt(1815, 12, 10).unwrap());
        p.zoned_date_times.insert(
            6,
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                .unwrap(),
        );
        p.enums.insert(8, vec!["RETIRED".into()]);
        p.objects.insert(
            7,
            ObjectProperty {
                child_entity_id: 2,
                value: Some(Box::new(Entity::with_guid(2, "a1"))),
            },
        );

        let table = people();
        let columns = table.columns(&catalog());
        let row = table.row(&entity, Some("parent"), &columns);

        assert_eq!(row[0], SqlValue::from("p1"));
        assert_eq!(row[1], SqlValue::I64(1));
        assert_eq!(row[2], SqlValue::from("parent".to_string()));
        // age (absent), born, home, last_seen, name, status_0, status_1
        assert_eq!(row[4], SqlValue::Null(SqlNullType::I32));
        assert_eq!(
            row[5],
            SqlValue::DateTime(NaiveDate::from_ymd_opt(1815, 12, 10).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(row[6], SqlValue::from("a1"));
        assert_eq!(row[7], SqlValue::I64(1_577_836_800));
        assert_eq!(row[8], SqlValue::from("Ada"));
        assert_eq!(row[9], SqlValue::Bool(false));
        assert_eq!(row[10], SqlValue::Bool(true));
        assert_eq!(row.len(), 11);
    }

    #[test]
    fn test_accepts_every_type_when_unrestricted() {
        assert!(ReportTable::new("R").accepts(42));
        assert!(people().accepts(1));
        assert!(!people().accepts(2));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("PersonReport"));
        assert!(is_identifier("_r2"));
        assert!(!is_identifier("2r"));
        assert!(!is_identifier("person report"));
        assert!(!is_identifier(""));
    }
}
