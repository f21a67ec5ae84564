//! Filter/query builder.
//!
//! A [`Filter`] accumulates predicate clauses on fields, grouped by explicit
//! [`and`](Filter::and)/[`or`](Filter::or) boundaries. Each clause joins its
//! own alias of the value table that stores its field's type, so clauses on
//! different fields of the same type match independently. Operands are bound
//! in the field's stored encoding (see [`FilterValue`]). [`Filter::execute`]
//! resolves the matching entity GUIDs and hands them to an [`EntityLoader`].
//!
//! ```rust,ignore
//! let people = Filter::new(&db)
//!     .of_type(PERSON)
//!     .equals(&first_name, "Ada")
//!     .and()
//!     .greater_than(&age, 30)
//!     .execute(&loader)
//!     .await?;
//! ```

mod value;

pub use value::FilterValue;

use async_trait::async_trait;
use tracing::debug;

use crate::core::entity::EntityId;
use crate::core::field::{Field, FieldId};
use crate::core::schema::{TableDef, STORE_ENTITY_OVERVIEW};
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Materializes entities from GUIDs. Implemented outside this crate by the
/// layer that knows the concrete entity types.
#[async_trait]
pub trait EntityLoader: Send + Sync {
    type Output: Send;

    async fn load(&self, db: &Database, guids: &[String]) -> Result<Vec<Self::Output>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

impl Connective {
    fn sql(self) -> &'static str {
        match self {
            Connective::And => " AND ",
            Connective::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equals,
    NotEquals,
    Like,
    NotLike,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone)]
struct Clause {
    alias: String,
    field_id: FieldId,
    op: Op,
    values: Vec<SqlValue<'static>>,
}

#[derive(Debug, Clone)]
struct Group {
    connective: Connective,
    clauses: Vec<Clause>,
}

impl Group {
    fn first() -> Self {
        Self {
            connective: Connective::And,
            clauses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    table: &'static TableDef,
    alias: String,
    field_id: FieldId,
}

/// Single-use query over stored entities.
pub struct Filter<'d> {
    db: &'d Database,
    entity_id: Option<EntityId>,
    groups: Vec<Group>,
    /// One aliased value table per clause, in clause order.
    joins: Vec<Join>,
    /// First clause that could not be rendered.
    invalid: Option<String>,
}

impl<'d> Filter<'d> {
    pub fn new(db: &'d Database) -> Self {
        Self {
            db,
            entity_id: None,
            groups: vec![Group::first()],
            joins: Vec::new(),
            invalid: None,
        }
    }

    /// Only match entities of this type code.
    pub fn of_type(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Start a group joined to the previous one with AND.
    pub fn and(self) -> Self {
        self.start_group(Connective::And)
    }

    /// Start a group joined to the previous one with OR.
    pub fn or(self) -> Self {
        self.start_group(Connective::Or)
    }

    pub fn equals(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::Equals, vec![value.into()])
    }

    pub fn not_equals(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::NotEquals, vec![value.into()])
    }

    /// `LIKE` with a caller-supplied pattern.
    pub fn like(self, field: &Field, pattern: impl Into<String>) -> Self {
        self.clause(field, Op::Like, vec![FilterValue::from(pattern.into())])
    }

    /// Values beginning with `prefix`.
    pub fn starts_like(self, field: &Field, prefix: impl Into<String>) -> Self {
        let pattern = format!("{}%", prefix.into());
        self.clause(field, Op::Like, vec![FilterValue::from(pattern)])
    }

    /// Values ending with `suffix`.
    pub fn ends_like(self, field: &Field, suffix: impl Into<String>) -> Self {
        let pattern = format!("%{}", suffix.into());
        self.clause(field, Op::Like, vec![FilterValue::from(pattern)])
    }

    pub fn not_like(self, field: &Field, pattern: impl Into<String>) -> Self {
        self.clause(field, Op::NotLike, vec![FilterValue::from(pattern.into())])
    }

    pub fn in_values<I, V>(self, field: &Field, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clause(field, Op::In, values)
    }

    pub fn not_in<I, V>(self, field: &Field, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clause(field, Op::NotIn, values)
    }

    pub fn greater_than(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::GreaterThan, vec![value.into()])
    }

    pub fn greater_than_or_equal(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::GreaterThanOrEqual, vec![value.into()])
    }

    pub fn less_than(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::LessThan, vec![value.into()])
    }

    pub fn less_than_or_equal(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::LessThanOrEqual, vec![value.into()])
    }

    /// Same as [`greater_than_or_equal`](Self::greater_than_or_equal).
    pub fn not_less_than(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::GreaterThanOrEqual, vec![value.into()])
    }

    /// Same as [`less_than_or_equal`](Self::less_than_or_equal).
    pub fn not_greater_than(self, field: &Field, value: impl Into<FilterValue>) -> Self {
        self.clause(field, Op::LessThanOrEqual, vec![value.into()])
    }

    pub fn between(
        self,
        field: &Field,
        low: impl Into<FilterValue>,
        high: impl Into<FilterValue>,
    ) -> Self {
        self.clause(field, Op::Between, vec![low.into(), high.into()])
    }

    pub fn is_null(self, field: &Field) -> Self {
        self.clause(field, Op::IsNull, Vec::new())
    }

    pub fn is_not_null(self, field: &Field) -> Self {
        self.clause(field, Op::IsNotNull, Vec::new())
    }

    fn start_group(mut self, connective: Connective) -> Self {
        self.groups.push(Group {
            connective,
            clauses: Vec::new(),
        });
        self
    }

    fn clause(mut self, field: &Field, op: Op, values: Vec<FilterValue>) -> Self {
        if self.invalid.is_some() {
            return self;
        }
        let Some(table) = field.field_type.value_table() else {
            self.invalid = Some(format!(
                "field {} ({}) has no value table and cannot be filtered",
                field.id, field.field_type
            ));
            return self;
        };

        let catalog = self.db.catalog();
        let values = match values
            .into_iter()
            .map(|v| v.stored_form(field, catalog))
            .collect::<Result<Vec<_>>>()
        {
            Ok(values) => values,
            Err(e) => {
                self.invalid = Some(e.to_string());
                return self;
            }
        };

        let alias = format!("{}{}", table.alias, self.joins.len());
        self.joins.push(Join {
            table,
            alias: alias.clone(),
            field_id: field.id,
        });
        if let Some(group) = self.groups.last_mut() {
            group.clauses.push(Clause {
                alias,
                field_id: field.id,
                op,
                values,
            });
        }
        self
    }

    /// Parameters in bind order.
    pub fn params(&self) -> Vec<&SqlValue<'static>> {
        self.groups
            .iter()
            .flat_map(|g| g.clauses.iter())
            .flat_map(|c| c.values.iter())
            .collect()
    }

    /// Render the SELECT statement.
    pub fn to_query(&self) -> Result<String> {
        if let Some(message) = &self.invalid {
            return Err(StoreError::Query(message.clone()));
        }

        let dialect = self.db.dialect();
        let overview = &STORE_ENTITY_OVERVIEW;
        let mut sql = format!(
            "SELECT {alias}.EntityGuid FROM {} {alias}",
            overview.name,
            alias = overview.alias
        );
        // LEFT joins keep an entity whose other OR branches have no row.
        for join in &self.joins {
            sql.push_str(&format!(
                " LEFT JOIN {} {a} ON {a}.EntityGuid = {o}.EntityGuid AND {a}.FieldId = {}",
                join.table.name,
                join.field_id,
                a = join.alias,
                o = overview.alias
            ));
        }

        let mut next_param = 1;
        let mut rendered_groups = String::new();
        for group in self.groups.iter().filter(|g| !g.clauses.is_empty()) {
            let clauses: Vec<String> = group
                .clauses
                .iter()
                .map(|c| render_clause(dialect, c, &mut next_param))
                .collect();
            if !rendered_groups.is_empty() {
                rendered_groups.push_str(group.connective.sql());
            }
            rendered_groups.push('(');
            rendered_groups.push_str(&clauses.join(" AND "));
            rendered_groups.push(')');
        }

        let mut conditions = Vec::new();
        if let Some(entity_id) = self.entity_id {
            conditions.push(format!("{}.EntityId = {}", overview.alias, entity_id));
        }
        if !rendered_groups.is_empty() {
            if conditions.is_empty() {
                conditions.push(rendered_groups);
            } else {
                conditions.push(format!("({})", rendered_groups));
            }
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(sql)
    }

    /// GUIDs of matching entities, first-seen order, without duplicates.
    pub async fn matching_guids(&self) -> Result<Vec<String>> {
        let sql = self.to_query()?;
        let params: Vec<SqlValue<'static>> = self.params().into_iter().cloned().collect();
        debug!("Filter query: {}", sql);

        let mut conn = self.db.connect().await?;
        let rows = conn.query_strings(&sql, &params, "EntityGuid").await;
        conn.release().await;

        let mut guids: Vec<String> = Vec::new();
        for guid in rows? {
            if !guids.contains(&guid) {
                guids.push(guid);
            }
        }
        Ok(guids)
    }

    /// Resolve matching GUIDs and load them. Consumes the filter.
    pub async fn execute<L: EntityLoader>(self, loader: &L) -> Result<Vec<L::Output>> {
        let guids = self.matching_guids().await?;
        debug!("Filter matched {} entities", guids.len());
        loader.load(self.db, &guids).await
    }

    /// Drop every accumulated clause, leaving an empty filter.
    pub fn close(&mut self) {
        self.entity_id = None;
        self.groups = vec![Group::first()];
        self.joins.clear();
        self.invalid = None;
    }
}

fn render_clause(dialect: &dyn Dialect, clause: &Clause, next_param: &mut usize) -> String {
    let mut placeholder = || {
        let p = dialect.param_placeholder(*next_param);
        *next_param += 1;
        p
    };
    let value = format!("{}.Value", clause.alias);

    let predicate = match clause.op {
        Op::Equals => format!("{} = {}", value, placeholder()),
        Op::NotEquals => format!("{} <> {}", value, placeholder()),
        Op::Like => format!("{} LIKE {}", value, placeholder()),
        Op::NotLike => format!("{} NOT LIKE {}", value, placeholder()),
        Op::GreaterThan => format!("{} > {}", value, placeholder()),
        Op::GreaterThanOrEqual => format!("{} >= {}", value, placeholder()),
        Op::LessThan => format!("{} < {}", value, placeholder()),
        Op::LessThanOrEqual => format!("{} <= {}", value, placeholder()),
        Op::Between => {
            let low = placeholder();
            let high = placeholder();
            format!("{} BETWEEN {} AND {}", value, low, high)
        }
        Op::In | Op::NotIn if clause.values.is_empty() => {
            let matches_nothing = clause.op == Op::In;
            return if matches_nothing {
                format!("({}.FieldId = {} AND 1 = 0)", clause.alias, clause.field_id)
            } else {
                format!("({}.FieldId = {})", clause.alias, clause.field_id)
            };
        }
        Op::In | Op::NotIn => {
            let list: Vec<String> = clause.values.iter().map(|_| placeholder()).collect();
            let keyword = if clause.op == Op::In { "IN" } else { "NOT IN" };
            format!("{} {} ({})", value, keyword, list.join(", "))
        }
        Op::IsNull => format!("{} IS NULL", value),
        Op::IsNotNull => format!("{} IS NOT NULL", value),
    };

    format!("({}.FieldId = {} AND {})", clause.alias, clause.field_id, predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConnectionProperties};
    use crate::core::field::{FieldCatalog, FieldEnum, FieldType};

    fn database(driver: &str, url: &str, user: &str) -> Database {
        Database::open(Config::new(ConnectionProperties::credentials(
            driver, url, user, "secret",
        )))
        .unwrap()
    }

    fn sqlite() -> Database {
        database("sqlite", "sqlite::memory:", "")
    }

    fn name() -> Field {
        Field::new(1, "name", FieldType::Text)
    }

    fn age() -> Field {
        Field::new(2, "age", FieldType::Integer)
    }

    fn street() -> Field {
        Field::new(3, "street", FieldType::Text)
    }

    fn status() -> Field {
        Field::new(4, "status", FieldType::Enum)
    }

    #[tokio::test]
    async fn test_two_groups_and_params_in_order() {
        let db = sqlite();
        let filter = Filter::new(&db)
            .equals(&name(), "x")
            .and()
            .greater_than(&age(), 5);

        assert_eq!(
            filter.to_query().unwrap(),
            "SELECT eo.EntityGuid FROM StoreEntityOverview eo \
             LEFT JOIN StoreText stx0 ON stx0.EntityGuid = eo.EntityGuid AND stx0.FieldId = 1 \
             LEFT JOIN StoreInteger sin1 ON sin1.EntityGuid = eo.EntityGuid AND sin1.FieldId = 2 \
             WHERE ((stx0.FieldId = 1 AND stx0.Value = ?)) AND ((sin1.FieldId = 2 AND sin1.Value > ?))"
        );
        assert_eq!(
            filter.params(),
            vec![&SqlValue::from("x"), &SqlValue::I32(5)]
        );
    }

    #[tokio::test]
    async fn test_no_clauses_has_no_where() {
        let db = sqlite();
        let filter = Filter::new(&db);
        assert_eq!(
            filter.to_query().unwrap(),
            "SELECT eo.EntityGuid FROM StoreEntityOverview eo"
        );
    }

    #[tokio::test]
    async fn test_of_type_wraps_groups() {
        let db = sqlite();
        let filter = Filter::new(&db)
            .of_type(7)
            .equals(&name(), "a")
            .or()
            .equals(&name(), "b");
        let sql = filter.to_query().unwrap();
        assert!(sql.ends_with(
            "WHERE eo.EntityId = 7 AND (((stx0.FieldId = 1 AND stx0.Value = ?)) OR ((stx1.FieldId = 1 AND stx1.Value = ?)))"
        ));
    }

    #[tokio::test]
    async fn test_same_type_fields_get_their_own_alias() {
        let db = sqlite();
        let sql = Filter::new(&db)
            .equals(&name(), "Ada")
            .and()
            .equals(&street(), "Main")
            .to_query()
            .unwrap();
        assert_eq!(sql.matches("LEFT JOIN StoreText").count(), 2);
        assert!(sql.contains("StoreText stx0 ON stx0.EntityGuid = eo.EntityGuid AND stx0.FieldId = 1"));
        assert!(sql.contains("StoreText stx1 ON stx1.EntityGuid = eo.EntityGuid AND stx1.FieldId = 3"));
        assert!(sql.contains("(stx0.FieldId = 1 AND stx0.Value = ?)"));
        assert!(sql.contains("(stx1.FieldId = 3 AND stx1.Value = ?)"));
    }

    #[tokio::test]
    async fn test_postgres_placeholders_are_numbered() {
        let db = database("postgres", "postgres://localhost/eav", "app");
        let filter = Filter::new(&db)
            .between(&age(), 18, 65)
            .and()
            .in_values(&name(), ["a", "b"]);
        let sql = filter.to_query().unwrap();
        assert!(sql.contains("sin0.Value BETWEEN $1 AND $2"));
        assert!(sql.contains("stx1.Value IN ($3, $4)"));
        assert_eq!(filter.params().len(), 4);
    }

    #[tokio::test]
    async fn test_operator_rendering() {
        let db = sqlite();
        let sql = Filter::new(&db)
            .less_than_or_equal(&age(), 3)
            .not_less_than(&age(), 1)
            .not_greater_than(&age(), 9)
            .is_null(&name())
            .to_query()
            .unwrap();
        assert!(sql.contains("sin0.Value <= ?"));
        assert!(sql.contains("sin1.Value >= ?"));
        assert!(sql.contains("sin2.Value <= ?"));
        assert!(sql.contains("stx3.Value IS NULL"));
        assert!(!sql.contains("!<"));
    }

    #[tokio::test]
    async fn test_like_variants_bind_patterns() {
        let db = sqlite();
        let filter = Filter::new(&db)
            .starts_like(&name(), "Ad")
            .ends_like(&name(), "da");
        assert_eq!(
            filter.params(),
            vec![&SqlValue::from("Ad%".to_string()), &SqlValue::from("%da".to_string())]
        );
    }

    #[tokio::test]
    async fn test_in_binds_each_value_once() {
        let db = sqlite();
        let filter = Filter::new(&db).not_in(&age(), [1, 2, 3]);
        assert_eq!(filter.params().len(), 3);
        assert!(filter.to_query().unwrap().contains("sin0.Value NOT IN (?, ?, ?)"));
    }

    #[tokio::test]
    async fn test_entity_field_is_rejected() {
        let db = sqlite();
        let child = Field::new(9, "child", FieldType::Entity);
        let filter = Filter::new(&db).is_not_null(&child);
        assert!(matches!(filter.to_query(), Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_operands_bind_in_stored_form() {
        let catalog = FieldCatalog::new()
            .with_enum(FieldEnum::new(status(), ["PROSPECT", "ACTIVE", "RETIRED"]))
            .unwrap();
        let db = sqlite().with_catalog(catalog);
        let visits = Field::new(5, "visits", FieldType::Long);
        let opens = Field::new(6, "opens", FieldType::Time);

        let filter = Filter::new(&db)
            .equals(&status(), "RETIRED")
            .greater_than(&visits, 10)
            .less_than(&opens, chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(
            filter.params(),
            vec![&SqlValue::I32(2), &SqlValue::I64(10), &SqlValue::I32(32_400)]
        );
        assert!(filter.to_query().unwrap().contains("StoreIntegerArray ain0"));
    }

    #[tokio::test]
    async fn test_unknown_enum_name_fails_the_query() {
        let catalog = FieldCatalog::new()
            .with_enum(FieldEnum::new(status(), ["PROSPECT", "ACTIVE"]))
            .unwrap();
        let db = sqlite().with_catalog(catalog);
        let filter = Filter::new(&db)
            .equals(&status(), "RETIRED")
            .and()
            .equals(&name(), "Ada");

        match filter.to_query() {
            Err(StoreError::Query(message)) => assert!(message.contains("RETIRED")),
            other => panic!("expected a query error, got {:?}", other),
        }
        assert!(filter.params().is_empty());
    }

    #[tokio::test]
    async fn test_close_clears_state() {
        let db = sqlite();
        let mut filter = Filter::new(&db).of_type(3).equals(&name(), "x");
        filter.close();
        assert!(filter.params().is_empty());
        assert_eq!(
            filter.to_query().unwrap(),
            "SELECT eo.EntityGuid FROM StoreEntityOverview eo"
        );
    }

    #[tokio::test]
    async fn test_clauses_after_close_are_kept() {
        let db = sqlite();
        let mut filter = Filter::new(&db).equals(&name(), "x");
        filter.close();
        let filter = filter.equals(&age(), 40);
        assert_eq!(filter.params(), vec![&SqlValue::I32(40)]);
        assert_eq!(
            filter.to_query().unwrap(),
            "SELECT eo.EntityGuid FROM StoreEntityOverview eo \
             LEFT JOIN StoreInteger sin0 ON sin0.EntityGuid = eo.EntityGuid AND sin0.FieldId = 2 \
             WHERE ((sin0.FieldId = 2 AND sin0.Value = ?))"
        );
    }
}
