//! Filter operands and their conversion to the form a field is stored in.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};

use crate::core::field::{Field, FieldCatalog, FieldType};
use crate::core::value::SqlValue;
use crate::error::{Result, StoreError};

/// Operand of a filter clause.
///
/// Plain values bind as given (after integer widening); enum names, dates,
/// times and zoned date-times are rewritten to their stored encoding once
/// the target field is known.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Sql(SqlValue<'static>),
    Date(NaiveDate),
    Time(NaiveTime),
    Zoned(DateTime<FixedOffset>),
}

impl FilterValue {
    /// Value as bound against `field`'s value table.
    pub(crate) fn stored_form(self, field: &Field, catalog: &FieldCatalog) -> Result<SqlValue<'static>> {
        let value = match self {
            FilterValue::Date(d) => return Ok(SqlValue::DateTime(d.and_time(NaiveTime::MIN))),
            FilterValue::Time(t) => return Ok(SqlValue::I32(t.num_seconds_from_midnight() as i32)),
            FilterValue::Zoned(z) => return Ok(SqlValue::I64(z.timestamp())),
            FilterValue::Sql(v) => v,
        };

        Ok(match (field.field_type, value) {
            (FieldType::Enum, SqlValue::Text(name)) => {
                let field_enum = catalog
                    .enum_for(field.id)
                    .ok_or(StoreError::UnknownField(field.id))?;
                let ordinal = field_enum.ordinal_of(&name).ok_or_else(|| {
                    StoreError::UnknownEnumValue {
                        field_id: field.id,
                        value: name.into_owned(),
                    }
                })?;
                SqlValue::I32(ordinal as i32)
            }
            (FieldType::Long | FieldType::LongArray | FieldType::ZonedDateTime, SqlValue::I32(v)) => {
                SqlValue::I64(i64::from(v))
            }
            (FieldType::Double | FieldType::DoubleArray, SqlValue::I32(v)) => {
                SqlValue::F64(f64::from(v))
            }
            (FieldType::Double | FieldType::DoubleArray, SqlValue::F32(v)) => {
                SqlValue::F64(f64::from(v))
            }
            (FieldType::Date, SqlValue::DateTime(dt)) => {
                SqlValue::DateTime(dt.date().and_time(NaiveTime::MIN))
            }
            (_, other) => other,
        })
    }
}

macro_rules! from_sql {
    ($($t:ty),+) => {
        $(impl From<$t> for FilterValue {
            fn from(v: $t) -> Self {
                FilterValue::Sql(SqlValue::from(v))
            }
        })+
    };
}

from_sql!(bool, i32, i64, f32, f64, String, Vec<u8>, NaiveDateTime);

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Sql(SqlValue::from(v.to_string()))
    }
}

impl From<SqlValue<'static>> for FilterValue {
    fn from(v: SqlValue<'static>) -> Self {
        FilterValue::Sql(v)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(v: NaiveDate) -> Self {
        FilterValue::Date(v)
    }
}

impl From<NaiveTime> for FilterValue {
    fn from(v: NaiveTime) -> Self {
        FilterValue::Time(v)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for FilterValue {
    fn from(v: DateTime<Tz>) -> Self {
        FilterValue::Zoned(v.fixed_offset())
    }
}
