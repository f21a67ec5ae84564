//! Statement plans for each category.
//!
//! Planning is pure: it turns staged property maps into the statements and
//! bound rows a category writes. Execution and transaction handling live in
//! the parent module.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDateTime, NaiveTime, Timelike, Utc};

use super::container::{entries, SaveContainer};
use super::report::Category;
use crate::config::RebindPolicy;
use crate::core::entity::{Entity, EntityId, EntityOverview};
use crate::core::field::FieldId;
use crate::core::schema::{
    TableDef, Upsert, STORE_DATE_TIME_ARRAY, STORE_DOUBLE_ARRAY, STORE_ENTITY_BINDING,
    STORE_FLOAT_ARRAY, STORE_INTEGER_ARRAY, STORE_LONG_ARRAY, STORE_OLD_FIELD_VALUES,
    STORE_TEXT_ARRAY,
};
use crate::core::traits::Dialect;
use crate::core::value::{Row, SqlValue};
use crate::database::Database;
use crate::error::Result;
use crate::tables::UniqueBy;

/// One statement executed once per bound row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement<'a> {
    pub sql: String,
    pub rows: Vec<Row<'a>>,
}

pub(crate) type Plan<'a> = Vec<Statement<'a>>;

/// Number of rows a plan writes.
pub(crate) fn row_count(plan: &Plan<'_>) -> usize {
    plan.iter().map(|s| s.rows.len()).sum()
}

/// Children currently referenced by one parent for one child type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindingGroup {
    pub parent: String,
    pub child_entity_id: EntityId,
    /// Distinct child GUIDs in first-seen order; may be empty.
    pub children: Vec<String>,
}

pub(crate) struct Planner<'d> {
    db: &'d Database,
    log_edits: bool,
    modified: NaiveDateTime,
}

impl<'d> Planner<'d> {
    pub fn new(db: &'d Database) -> Self {
        Self {
            db,
            log_edits: db.settings().log_edits,
            modified: Utc::now().naive_utc(),
        }
    }

    /// Plans for every value category, in commit order.
    pub fn value_categories<'a>(
        &self,
        c: &'a SaveContainer<'a>,
    ) -> Vec<(Category, Result<Plan<'a>>)> {
        let start_of_day = |d: &chrono::NaiveDate| d.and_time(NaiveTime::MIN);

        let date_times = entries(&c.date_times)
            .map(|(g, f, v)| (g, f, SqlValue::DateTime(*v)))
            .chain(entries(&c.dates).map(|(g, f, v)| (g, f, SqlValue::DateTime(start_of_day(v)))));

        vec![
            (Category::Overview, Ok(self.overview(&c.overviews))),
            (
                Category::Booleans,
                Ok(self.scalar(
                    Upsert::Boolean,
                    "IntegerValue",
                    entries(&c.booleans).map(|(g, f, v)| (g, f, SqlValue::Bool(*v))),
                    |v| match v {
                        SqlValue::Bool(b) => SqlValue::I32(i32::from(*b)),
                        other => other.clone(),
                    },
                )),
            ),
            (
                Category::Strings,
                Ok(self.scalar(
                    Upsert::Text,
                    "TextValue",
                    entries(&c.strings).map(|(g, f, v)| (g, f, SqlValue::text_borrowed(v))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::DateTimes,
                Ok(self.scalar(Upsert::DateTime, "DateTimeValue", date_times, SqlValue::clone)),
            ),
            (
                Category::ZonedDateTimes,
                Ok(self.scalar(
                    Upsert::ZonedDateTime,
                    "LongValue",
                    entries(&c.zoned_date_times).map(|(g, f, v)| (g, f, SqlValue::I64(v.timestamp()))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::Times,
                Ok(self.scalar(
                    Upsert::Time,
                    "IntegerValue",
                    entries(&c.times)
                        .map(|(g, f, v)| (g, f, SqlValue::I32(v.num_seconds_from_midnight() as i32))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::Longs,
                Ok(self.scalar(
                    Upsert::Long,
                    "LongValue",
                    entries(&c.longs).map(|(g, f, v)| (g, f, SqlValue::I64(*v))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::Doubles,
                Ok(self.scalar(
                    Upsert::Double,
                    "DoubleValue",
                    entries(&c.doubles).map(|(g, f, v)| (g, f, SqlValue::F64(*v))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::Integers,
                Ok(self.scalar(
                    Upsert::Integer,
                    "IntegerValue",
                    entries(&c.integers).map(|(g, f, v)| (g, f, SqlValue::I32(*v))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::Floats,
                Ok(self.scalar(
                    Upsert::Float,
                    "FloatValue",
                    entries(&c.floats).map(|(g, f, v)| (g, f, SqlValue::F32(*v))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::Blobs,
                Ok(self.scalar(
                    Upsert::Blob,
                    "BlobValue",
                    entries(&c.blobs).map(|(g, f, v)| (g, f, SqlValue::bytes_borrowed(v))),
                    SqlValue::clone,
                )),
            ),
            (
                Category::DateTimeArrays,
                Ok(self.array(
                    &STORE_DATE_TIME_ARRAY,
                    "DateTimeValue",
                    entries(&c.date_time_arrays)
                        .map(|(g, f, v)| (g, f, v.iter().map(|x| SqlValue::DateTime(*x)).collect())),
                )),
            ),
            (
                Category::StringArrays,
                Ok(self.array(
                    &STORE_TEXT_ARRAY,
                    "TextValue",
                    entries(&c.string_arrays)
                        .map(|(g, f, v)| (g, f, v.iter().map(|x| SqlValue::text_borrowed(x)).collect())),
                )),
            ),
            (
                Category::LongArrays,
                Ok(self.array(
                    &STORE_LONG_ARRAY,
                    "LongValue",
                    entries(&c.long_arrays)
                        .map(|(g, f, v)| (g, f, v.iter().map(|x| SqlValue::I64(*x)).collect())),
                )),
            ),
            (
                Category::DoubleArrays,
                Ok(self.array(
                    &STORE_DOUBLE_ARRAY,
                    "DoubleValue",
                    entries(&c.double_arrays)
                        .map(|(g, f, v)| (g, f, v.iter().map(|x| SqlValue::F64(*x)).collect())),
                )),
            ),
            (
                Category::IntegerArrays,
                Ok(self.array(
                    &STORE_INTEGER_ARRAY,
                    "IntegerValue",
                    entries(&c.integer_arrays)
                        .map(|(g, f, v)| (g, f, v.iter().map(|x| SqlValue::I32(*x)).collect())),
                )),
            ),
            (
                Category::FloatArrays,
                Ok(self.array(
                    &STORE_FLOAT_ARRAY,
                    "FloatValue",
                    entries(&c.float_arrays)
                        .map(|(g, f, v)| (g, f, v.iter().map(|x| SqlValue::F32(*x)).collect())),
                )),
            ),
            (Category::Enums, self.enums(c)),
        ]
    }

    fn overview<'a>(&self, overviews: &[&'a EntityOverview]) -> Plan<'a> {
        let rows = overviews
            .iter()
            .map(|o| {
                vec![
                    SqlValue::text_borrowed(&o.entity_guid),
                    SqlValue::DateTime(o.date_created),
                    SqlValue::DateTime(o.date_modified),
                    SqlValue::I64(o.entity_id),
                ]
            })
            .collect();
        vec![Statement {
            sql: self.db.upsert_statement_for(Upsert::Overview),
            rows,
        }]
    }

    /// Upsert plus, with the audit log on, one audit row per value.
    fn scalar<'a, I, F>(&self, upsert: Upsert, audit_column: &str, values: I, audit_value: F) -> Plan<'a>
    where
        I: Iterator<Item = (&'a str, FieldId, SqlValue<'a>)>,
        F: Fn(&SqlValue<'a>) -> SqlValue<'a>,
    {
        let mut upserts = Vec::new();
        let mut audits = Vec::new();
        for (guid, field, value) in values {
            if self.log_edits {
                audits.push(self.audit_row(guid, field, 0, audit_value(&value)));
            }
            upserts.push(vec![SqlValue::text_borrowed(guid), SqlValue::I64(field), value]);
        }

        let mut plan = vec![Statement {
            sql: self.db.upsert_statement_for(upsert),
            rows: upserts,
        }];
        if self.log_edits {
            plan.push(self.audit_statement(audit_column, audits));
        }
        plan
    }

    /// Delete every touched (guid, field) pair, then insert the current
    /// sequence with zero-based ordinals.
    fn array<'a, I>(&self, table: &TableDef, audit_column: &str, values: I) -> Plan<'a>
    where
        I: Iterator<Item = (&'a str, FieldId, Vec<SqlValue<'a>>)>,
    {
        let dialect = self.db.dialect();
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();
        let mut audits = Vec::new();

        for (guid, field, items) in values {
            deletes.push(vec![SqlValue::text_borrowed(guid), SqlValue::I64(field)]);
            for (sequence, value) in items.into_iter().enumerate() {
                let sequence = sequence as i32;
                if self.log_edits {
                    audits.push(self.audit_row(guid, field, sequence, value.clone()));
                }
                inserts.push(vec![
                    SqlValue::text_borrowed(guid),
                    SqlValue::I64(field),
                    SqlValue::I32(sequence),
                    value,
                ]);
            }
        }

        let mut plan = vec![
            Statement {
                sql: dialect.build_delete(table.name, &["EntityGuid", "FieldId"]),
                rows: deletes,
            },
            Statement {
                sql: dialect.build_insert(table.name, &["EntityGuid", "FieldId", "Sequence", "Value"]),
                rows: inserts,
            },
        ];
        if self.log_edits {
            plan.push(self.audit_statement(audit_column, audits));
        }
        plan
    }

    /// Enum values as ordinals of the field's declared values.
    fn enums<'a>(&self, c: &'a SaveContainer<'a>) -> Result<Plan<'a>> {
        let mut resolved = Vec::new();
        for (guid, field, values) in entries(&c.enums) {
            let ordinals = values
                .iter()
                .map(|v| self.db.ordinal_of(field, v).map(SqlValue::I32))
                .collect::<Result<Vec<_>>>()?;
            resolved.push((guid, field, ordinals));
        }
        Ok(self.array(&STORE_INTEGER_ARRAY, "IntegerValue", resolved.into_iter()))
    }

    /// Report table rows for `entities`: rows being replaced are deleted
    /// first, then one row per accepted entity is inserted.
    pub fn reports<'a>(&self, entities: &[&'a Entity], parents: &HashMap<String, String>) -> Plan<'a> {
        let dialect = self.db.dialect();
        let mut plan = Vec::new();
        for table in self.db.report_tables() {
            let columns = table.columns(self.db.catalog());
            let mut deletes = Vec::new();
            let mut inserts = Vec::new();
            for &entity in entities.iter().filter(|e| table.accepts(e.entity_id())) {
                let parent = parents.get(entity.guid()).map(String::as_str);
                match (table.unique_by, parent) {
                    (Some(UniqueBy::Guid), _) => {
                        deletes.push(vec![SqlValue::text_borrowed(entity.guid())])
                    }
                    (Some(UniqueBy::ParentGuid), Some(parent)) => {
                        deletes.push(vec![SqlValue::from(parent.to_string())])
                    }
                    _ => {}
                }
                inserts.push(table.row(entity, parent, &columns));
            }
            if let Some(by) = table.unique_by {
                plan.push(Statement {
                    sql: table.delete_sql(dialect, by),
                    rows: deletes,
                });
            }
            plan.push(Statement {
                sql: table.insert_sql(dialect, &columns),
                rows: inserts,
            });
        }
        plan
    }

    /// Clear and rebind each (parent, child type) pair.
    pub fn bindings(&self, groups: &[BindingGroup], policy: RebindPolicy) -> Plan<'static> {
        let dialect = self.db.dialect();
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();

        for group in groups {
            if group.children.is_empty() && policy == RebindPolicy::PreserveWhenEmpty {
                continue;
            }
            deletes.push(vec![
                SqlValue::from(group.parent.clone()),
                SqlValue::I64(group.child_entity_id),
            ]);
            for child in &group.children {
                inserts.push(vec![
                    SqlValue::from(group.parent.clone()),
                    SqlValue::from(child.clone()),
                    SqlValue::I64(group.child_entity_id),
                ]);
            }
        }

        let table = STORE_ENTITY_BINDING.name;
        vec![
            Statement {
                sql: dialect.build_delete(table, &["ParentEntityGuid", "ChildEntityId"]),
                rows: deletes,
            },
            Statement {
                sql: dialect.build_insert(
                    table,
                    &["ParentEntityGuid", "ChildEntityGuid", "ChildEntityId"],
                ),
                rows: inserts,
            },
        ]
    }

    fn audit_row<'a>(&self, guid: &'a str, field: FieldId, sequence: i32, value: SqlValue<'a>) -> Row<'a> {
        vec![
            SqlValue::text_borrowed(guid),
            SqlValue::I64(field),
            SqlValue::DateTime(self.modified),
            SqlValue::I32(sequence),
            value,
        ]
    }

    fn audit_statement<'a>(&self, column: &str, rows: Vec<Row<'a>>) -> Statement<'a> {
        Statement {
            sql: self.db.dialect().build_insert(
                STORE_OLD_FIELD_VALUES.name,
                &["EntityGuid", "FieldId", "DateOfModification", "Sequence", column],
            ),
            rows,
        }
    }
}

/// Group each parent's current references by child type.
///
/// Every declared object property yields a group, even when it references
/// nothing, so the rebind policy can see empty lists.
pub(crate) fn binding_groups(c: &SaveContainer<'_>) -> Vec<BindingGroup> {
    let mut groups: BTreeMap<(String, EntityId), Vec<String>> = BTreeMap::new();

    for (guid, field_objects) in &c.objects {
        for object in field_objects.values() {
            let children = groups
                .entry((guid.to_string(), object.child_entity_id))
                .or_default();
            if let Some(child) = object.value.as_deref() {
                push_distinct(children, child.guid());
            }
        }
    }
    for (guid, field_arrays) in &c.object_arrays {
        for array in field_arrays.values() {
            let children = groups
                .entry((guid.to_string(), array.child_entity_id))
                .or_default();
            for child in &array.items {
                push_distinct(children, child.guid());
            }
        }
    }

    groups
        .into_iter()
        .map(|((parent, child_entity_id), children)| BindingGroup {
            parent,
            child_entity_id,
            children,
        })
        .collect()
}

fn push_distinct(children: &mut Vec<String>, guid: &str) {
    if !children.iter().any(|c| c == guid) {
        children.push(guid.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConnectionProperties};
    use crate::core::entity::Entity;
    use crate::core::field::{Field, FieldCatalog, FieldEnum, FieldType};

    const STATUS: FieldId = 40;

    fn database(log_edits: bool) -> Database {
        let config = Config::new(ConnectionProperties::credentials(
            "sqlite",
            "sqlite::memory:",
            "",
            "",
        ));
        let catalog = FieldCatalog::new()
            .with_enum(FieldEnum::new(
                Field::new(STATUS, "status", FieldType::Enum),
                ["DRAFT", "ACTIVE", "RETIRED"],
            ))
            .unwrap();
        let mut db = Database::open(config).unwrap().with_catalog(catalog);
        db.set_log_edits(log_edits);
        db
    }

    fn plan_for(plans: Vec<(Category, Result<Plan<'_>>)>, category: Category) -> Result<Plan<'_>> {
        plans
            .into_iter()
            .find(|(c, _)| *c == category)
            .map(|(_, p)| p)
            .unwrap()
    }

    #[tokio::test]
    async fn test_enum_values_become_ordinals() {
        let db = database(false);
        let mut entity = Entity::with_guid(1, "g1");
        entity.properties.enums.insert(STATUS, vec!["RETIRED".into()]);
        let entities = [entity];
        let container = SaveContainer::stage(entities.iter());

        let planner = Planner::new(&db);
        let plan = plan_for(planner.value_categories(&container), Category::Enums).unwrap();

        assert!(plan[0].sql.starts_with("DELETE FROM StoreIntegerArray"));
        assert_eq!(
            plan[1].rows,
            vec![vec![
                SqlValue::from("g1"),
                SqlValue::I64(STATUS),
                SqlValue::I32(0),
                SqlValue::I32(2),
            ]]
        );
    }

    #[tokio::test]
    async fn test_unknown_enum_value_fails_category() {
        let db = database(false);
        let mut entity = Entity::with_guid(1, "g1");
        entity.properties.enums.insert(STATUS, vec!["ARCHIVED".into()]);
        let entities = [entity];
        let container = SaveContainer::stage(entities.iter());

        let planner = Planner::new(&db);
        let result = plan_for(planner.value_categories(&container), Category::Enums);
        assert!(matches!(
            result,
            Err(crate::error::StoreError::UnknownEnumValue { field_id: STATUS, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_array_still_clears_rows() {
        let db = database(false);
        let mut entity = Entity::with_guid(1, "g1");
        entity.properties.long_arrays.insert(7, Vec::new());
        let entities = [entity];
        let container = SaveContainer::stage(entities.iter());

        let planner = Planner::new(&db);
        let plan = plan_for(planner.value_categories(&container), Category::LongArrays).unwrap();
        assert!(plan[0].sql.starts_with("DELETE FROM StoreLongArray"));
        assert_eq!(plan[0].rows.len(), 1);
        assert!(plan[1].rows.is_empty());
    }

    #[tokio::test]
    async fn test_audit_rows_only_when_logging() {
        let mut entity = Entity::with_guid(1, "g1");
        entity.properties.booleans.insert(3, true);
        let entities = [entity];
        let container = SaveContainer::stage(entities.iter());

        let quiet = database(false);
        let plan = plan_for(Planner::new(&quiet).value_categories(&container), Category::Booleans)
            .unwrap();
        assert_eq!(plan.len(), 1);

        let logged = database(true);
        let plan = plan_for(Planner::new(&logged).value_categories(&container), Category::Booleans)
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan[1].sql.contains("StoreOldFieldValues"));
        assert!(plan[1].sql.contains("IntegerValue"));
        assert_eq!(plan[1].rows[0][3], SqlValue::I32(0));
        assert_eq!(plan[1].rows[0][4], SqlValue::I32(1));
    }

    #[tokio::test]
    async fn test_dates_share_date_time_category() {
        let db = database(false);
        let mut entity = Entity::with_guid(1, "g1");
        let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        entity.properties.dates.insert(5, date);
        let entities = [entity];
        let container = SaveContainer::stage(entities.iter());

        let plan = plan_for(Planner::new(&db).value_categories(&container), Category::DateTimes)
            .unwrap();
        assert!(plan[0].sql.contains("StoreDateTime"));
        assert_eq!(plan[0].rows[0][2], SqlValue::DateTime(date.and_time(NaiveTime::MIN)));
    }

    #[test]
    fn test_binding_groups_dedupe_children() {
        let child = Entity::with_guid(9, "c1");
        let mut parent = Entity::with_guid(1, "p1");
        parent.set_object(1, child.clone());
        parent.set_object_array(2, 9, vec![child.clone(), Entity::with_guid(9, "c2")]);
        parent.set_object_array(3, 8, Vec::new());

        let entities = [parent];
        let container = SaveContainer::stage(entities.iter());
        let groups = binding_groups(&container);

        assert_eq!(
            groups,
            vec![
                BindingGroup {
                    parent: "p1".into(),
                    child_entity_id: 8,
                    children: vec![],
                },
                BindingGroup {
                    parent: "p1".into(),
                    child_entity_id: 9,
                    children: vec!["c1".into(), "c2".into()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_rebind_policy_controls_empty_groups() {
        let db = database(false);
        let planner = Planner::new(&db);
        let groups = vec![BindingGroup {
            parent: "p1".into(),
            child_entity_id: 8,
            children: vec![],
        }];

        let preserve = planner.bindings(&groups, RebindPolicy::PreserveWhenEmpty);
        assert_eq!(row_count(&preserve), 0);

        let clear = planner.bindings(&groups, RebindPolicy::ClearWhenEmpty);
        assert_eq!(clear[0].rows.len(), 1);
        assert!(clear[1].rows.is_empty());
    }
}
