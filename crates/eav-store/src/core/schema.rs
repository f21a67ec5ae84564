//! The fixed EAV schema: tables, indexes, stored procedures and triggers.
//!
//! The catalog is pure data. Dialects render it into engine-specific DDL and
//! the bootstrapper walks [`bootstrap_order`] to provision it.

use std::fmt;

use serde::Serialize;

/// Logical column type, mapped to an engine type by each dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Entity GUID (bounded string, usable in keys).
    Guid,
    /// Registry names (bounded string).
    Name,
    Text,
    Int,
    BigInt,
    Float,
    Double,
    Bool,
    Blob,
    DateTime,
}

/// Column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
}

const fn key(name: &'static str, column_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        column_type,
        nullable: false,
    }
}

const fn value(name: &'static str, column_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        column_type,
        nullable: true,
    }
}

/// Table definition.
#[derive(Debug, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    /// Alias used when the table is joined by the filter builder.
    pub alias: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static [&'static str],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Secondary index definition.
#[derive(Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static TableDef,
    pub columns: &'static [&'static str],
}

pub const REF_FIELD_TYPES: TableDef = TableDef {
    name: "RefFieldTypes",
    alias: "rft",
    columns: &[key("TypeId", ColumnType::Int), value("TypeName", ColumnType::Name)],
    primary_key: &["TypeId"],
};

pub const REF_FIELDS: TableDef = TableDef {
    name: "RefFields",
    alias: "rf",
    columns: &[
        key("FieldId", ColumnType::BigInt),
        value("FieldName", ColumnType::Name),
        value("TypeId", ColumnType::Int),
    ],
    primary_key: &["FieldId"],
};

pub const REF_ENUM_VALUES: TableDef = TableDef {
    name: "RefEnumValues",
    alias: "rev",
    columns: &[
        key("FieldId", ColumnType::BigInt),
        key("EnumIndex", ColumnType::Int),
        value("EnumValue", ColumnType::Name),
    ],
    primary_key: &["FieldId", "EnumIndex"],
};

pub const REF_ENTITIES: TableDef = TableDef {
    name: "RefEntities",
    alias: "re",
    columns: &[key("EntityId", ColumnType::BigInt), value("EntityName", ColumnType::Name)],
    primary_key: &["EntityId"],
};

pub const BIND_ENTITY_FIELDS: TableDef = TableDef {
    name: "BindEntityFields",
    alias: "bef",
    columns: &[key("EntityId", ColumnType::BigInt), key("FieldId", ColumnType::BigInt)],
    primary_key: &["EntityId", "FieldId"],
};

pub const BIND_ENTITY_ENUMS: TableDef = TableDef {
    name: "BindEntityEnums",
    alias: "bee",
    columns: &[key("EntityId", ColumnType::BigInt), key("FieldId", ColumnType::BigInt)],
    primary_key: &["EntityId", "FieldId"],
};

pub const STORE_ENTITY_OVERVIEW: TableDef = TableDef {
    name: "StoreEntityOverview",
    alias: "eo",
    columns: &[
        key("EntityGuid", ColumnType::Guid),
        value("DateCreated", ColumnType::DateTime),
        value("DateModified", ColumnType::DateTime),
        value("EntityId", ColumnType::BigInt),
    ],
    primary_key: &["EntityGuid"],
};

pub const STORE_ENTITY_BINDING: TableDef = TableDef {
    name: "StoreEntityBinding",
    alias: "eb",
    columns: &[
        key("ParentEntityGuid", ColumnType::Guid),
        key("ChildEntityGuid", ColumnType::Guid),
        value("ChildEntityId", ColumnType::BigInt),
    ],
    primary_key: &["ParentEntityGuid", "ChildEntityGuid"],
};

macro_rules! scalar_table {
    ($ident:ident, $name:literal, $alias:literal, $ty:expr) => {
        pub const $ident: TableDef = TableDef {
            name: $name,
            alias: $alias,
            columns: &[
                key("EntityGuid", ColumnType::Guid),
                key("FieldId", ColumnType::BigInt),
                value("Value", $ty),
            ],
            primary_key: &["EntityGuid", "FieldId"],
        };
    };
}

macro_rules! array_table {
    ($ident:ident, $name:literal, $alias:literal, $ty:expr) => {
        pub const $ident: TableDef = TableDef {
            name: $name,
            alias: $alias,
            columns: &[
                key("EntityGuid", ColumnType::Guid),
                key("FieldId", ColumnType::BigInt),
                key("Sequence", ColumnType::Int),
                value("Value", $ty),
            ],
            primary_key: &["EntityGuid", "FieldId", "Sequence"],
        };
    };
}

scalar_table!(STORE_TEXT, "StoreText", "stx", ColumnType::Text);
scalar_table!(STORE_INTEGER, "StoreInteger", "sin", ColumnType::Int);
scalar_table!(STORE_LONG, "StoreLong", "slo", ColumnType::BigInt);
scalar_table!(STORE_FLOAT, "StoreFloat", "sfl", ColumnType::Float);
scalar_table!(STORE_DOUBLE, "StoreDouble", "sdo", ColumnType::Double);
scalar_table!(STORE_DATE_TIME, "StoreDateTime", "sdt", ColumnType::DateTime);
scalar_table!(STORE_ZONED_DATE_TIME, "StoreZonedDateTime", "szd", ColumnType::BigInt);
scalar_table!(STORE_TIME, "StoreTime", "sti", ColumnType::Int);
scalar_table!(STORE_BOOLEAN, "StoreBoolean", "sbo", ColumnType::Bool);
scalar_table!(STORE_BLOB, "StoreBlob", "sbl", ColumnType::Blob);

array_table!(STORE_TEXT_ARRAY, "StoreTextArray", "atx", ColumnType::Text);
array_table!(STORE_INTEGER_ARRAY, "StoreIntegerArray", "ain", ColumnType::Int);
array_table!(STORE_LONG_ARRAY, "StoreLongArray", "alo", ColumnType::BigInt);
array_table!(STORE_FLOAT_ARRAY, "StoreFloatArray", "afl", ColumnType::Float);
array_table!(STORE_DOUBLE_ARRAY, "StoreDoubleArray", "ado", ColumnType::Double);
array_table!(STORE_DATE_TIME_ARRAY, "StoreDateTimeArray", "adt", ColumnType::DateTime);

/// Append-only audit log of written values.
pub const STORE_OLD_FIELD_VALUES: TableDef = TableDef {
    name: "StoreOldFieldValues",
    alias: "ofv",
    columns: &[
        key("EntityGuid", ColumnType::Guid),
        key("FieldId", ColumnType::BigInt),
        key("DateOfModification", ColumnType::DateTime),
        key("Sequence", ColumnType::Int),
        value("TextValue", ColumnType::Text),
        value("IntegerValue", ColumnType::Int),
        value("LongValue", ColumnType::BigInt),
        value("FloatValue", ColumnType::Float),
        value("DoubleValue", ColumnType::Double),
        value("DateTimeValue", ColumnType::DateTime),
        value("BlobValue", ColumnType::Blob),
    ],
    primary_key: &[],
};

pub const IX_ENTITY_OVERVIEW_ENTITY_ID: IndexDef = IndexDef {
    name: "IxEntityOverviewEntityId",
    table: &STORE_ENTITY_OVERVIEW,
    columns: &["EntityId"],
};

pub const IX_ENTITY_BINDING_PARENT: IndexDef = IndexDef {
    name: "IxEntityBindingParent",
    table: &STORE_ENTITY_BINDING,
    columns: &["ParentEntityGuid", "ChildEntityId"],
};

pub const IX_OLD_FIELD_VALUES_ENTITY: IndexDef = IndexDef {
    name: "IxOldFieldValuesEntity",
    table: &STORE_OLD_FIELD_VALUES,
    columns: &["EntityGuid", "FieldId"],
};

/// Name of the trigger that unbinds children when a parent overview row is deleted.
pub const CASCADE_ENTITY_BINDING: &str = "CascadeEntityBinding";

/// Named upsert operations. Each can be rendered as a literal statement or,
/// where the engine has procedural SQL, as a stored-procedure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Upsert {
    Text,
    Integer,
    Long,
    Float,
    Double,
    DateTime,
    ZonedDateTime,
    Time,
    Boolean,
    Blob,
    Overview,
    EntityFields,
    EntityEnums,
    EntityName,
    EnumValues,
    FieldNames,
    FieldTypes,
}

/// Shape of an upsert: the target table, the bound columns in parameter
/// order, the conflict key and the columns refreshed on conflict.
#[derive(Debug)]
pub struct UpsertDef {
    pub table: &'static TableDef,
    pub columns: &'static [&'static str],
    pub key_columns: &'static [&'static str],
    pub update_columns: &'static [&'static str],
    pub procedure: &'static str,
}

const VALUE_COLUMNS: &[&str] = &["EntityGuid", "FieldId", "Value"];
const VALUE_KEY: &[&str] = &["EntityGuid", "FieldId"];

const fn scalar_upsert(table: &'static TableDef, procedure: &'static str) -> UpsertDef {
    UpsertDef {
        table,
        columns: VALUE_COLUMNS,
        key_columns: VALUE_KEY,
        update_columns: &["Value"],
        procedure,
    }
}

const UPSERT_TEXT: UpsertDef = scalar_upsert(&STORE_TEXT, "procStoreText");
const UPSERT_INTEGER: UpsertDef = scalar_upsert(&STORE_INTEGER, "procStoreInteger");
const UPSERT_LONG: UpsertDef = scalar_upsert(&STORE_LONG, "procStoreLong");
const UPSERT_FLOAT: UpsertDef = scalar_upsert(&STORE_FLOAT, "procStoreFloat");
const UPSERT_DOUBLE: UpsertDef = scalar_upsert(&STORE_DOUBLE, "procStoreDouble");
const UPSERT_DATE_TIME: UpsertDef = scalar_upsert(&STORE_DATE_TIME, "procStoreDateTime");
const UPSERT_ZONED_DATE_TIME: UpsertDef =
    scalar_upsert(&STORE_ZONED_DATE_TIME, "procStoreZonedDateTime");
const UPSERT_TIME: UpsertDef = scalar_upsert(&STORE_TIME, "procStoreTime");
const UPSERT_BOOLEAN: UpsertDef = scalar_upsert(&STORE_BOOLEAN, "procStoreBoolean");
const UPSERT_BLOB: UpsertDef = scalar_upsert(&STORE_BLOB, "procStoreBlob");

const UPSERT_OVERVIEW: UpsertDef = UpsertDef {
    table: &STORE_ENTITY_OVERVIEW,
    columns: &["EntityGuid", "DateCreated", "DateModified", "EntityId"],
    key_columns: &["EntityGuid"],
    update_columns: &["DateModified", "EntityId"],
    procedure: "procStoreEntityOverview",
};

const UPSERT_ENTITY_FIELDS: UpsertDef = UpsertDef {
    table: &BIND_ENTITY_FIELDS,
    columns: &["EntityId", "FieldId"],
    key_columns: &["EntityId", "FieldId"],
    update_columns: &[],
    procedure: "procBindEntityFields",
};

const UPSERT_ENTITY_ENUMS: UpsertDef = UpsertDef {
    table: &BIND_ENTITY_ENUMS,
    columns: &["EntityId", "FieldId"],
    key_columns: &["EntityId", "FieldId"],
    update_columns: &[],
    procedure: "procBindEntityEnums",
};

const UPSERT_ENTITY_NAME: UpsertDef = UpsertDef {
    table: &REF_ENTITIES,
    columns: &["EntityId", "EntityName"],
    key_columns: &["EntityId"],
    update_columns: &["EntityName"],
    procedure: "procRefEntities",
};

const UPSERT_ENUM_VALUES: UpsertDef = UpsertDef {
    table: &REF_ENUM_VALUES,
    columns: &["FieldId", "EnumIndex", "EnumValue"],
    key_columns: &["FieldId", "EnumIndex"],
    update_columns: &["EnumValue"],
    procedure: "procRefEnumValues",
};

const UPSERT_FIELD_NAMES: UpsertDef = UpsertDef {
    table: &REF_FIELDS,
    columns: &["FieldId", "FieldName", "TypeId"],
    key_columns: &["FieldId"],
    update_columns: &["FieldName", "TypeId"],
    procedure: "procRefFields",
};

const UPSERT_FIELD_TYPES: UpsertDef = UpsertDef {
    table: &REF_FIELD_TYPES,
    columns: &["TypeId", "TypeName"],
    key_columns: &["TypeId"],
    update_columns: &["TypeName"],
    procedure: "procRefFieldTypes",
};

impl Upsert {
    pub const ALL: [Upsert; 17] = [
        Upsert::Text,
        Upsert::Integer,
        Upsert::Long,
        Upsert::Float,
        Upsert::Double,
        Upsert::DateTime,
        Upsert::ZonedDateTime,
        Upsert::Time,
        Upsert::Boolean,
        Upsert::Blob,
        Upsert::Overview,
        Upsert::EntityFields,
        Upsert::EntityEnums,
        Upsert::EntityName,
        Upsert::EnumValues,
        Upsert::FieldNames,
        Upsert::FieldTypes,
    ];

    pub fn def(self) -> &'static UpsertDef {
        match self {
            Upsert::Text => &UPSERT_TEXT,
            Upsert::Integer => &UPSERT_INTEGER,
            Upsert::Long => &UPSERT_LONG,
            Upsert::Float => &UPSERT_FLOAT,
            Upsert::Double => &UPSERT_DOUBLE,
            Upsert::DateTime => &UPSERT_DATE_TIME,
            Upsert::ZonedDateTime => &UPSERT_ZONED_DATE_TIME,
            Upsert::Time => &UPSERT_TIME,
            Upsert::Boolean => &UPSERT_BOOLEAN,
            Upsert::Blob => &UPSERT_BLOB,
            Upsert::Overview => &UPSERT_OVERVIEW,
            Upsert::EntityFields => &UPSERT_ENTITY_FIELDS,
            Upsert::EntityEnums => &UPSERT_ENTITY_ENUMS,
            Upsert::EntityName => &UPSERT_ENTITY_NAME,
            Upsert::EnumValues => &UPSERT_ENUM_VALUES,
            Upsert::FieldNames => &UPSERT_FIELD_NAMES,
            Upsert::FieldTypes => &UPSERT_FIELD_TYPES,
        }
    }

    pub fn procedure_name(self) -> &'static str {
        self.def().procedure
    }
}

/// Kind of schema component, as understood by existence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Table,
    StoredProcedure,
    Trigger,
    Index,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Table => "table",
            ComponentKind::StoredProcedure => "stored procedure",
            ComponentKind::Trigger => "trigger",
            ComponentKind::Index => "index",
        };
        f.write_str(s)
    }
}

/// One provisionable piece of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Table(&'static TableDef),
    Index(&'static IndexDef),
    Procedure(Upsert),
    CascadeTrigger,
}

impl Component {
    pub fn name(&self) -> &'static str {
        match self {
            Component::Table(t) => t.name,
            Component::Index(i) => i.name,
            Component::Procedure(u) => u.procedure_name(),
            Component::CascadeTrigger => CASCADE_ENTITY_BINDING,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Table(_) => ComponentKind::Table,
            Component::Index(_) => ComponentKind::Index,
            Component::Procedure(_) => ComponentKind::StoredProcedure,
            Component::CascadeTrigger => ComponentKind::Trigger,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

/// Registry tables, in creation order.
pub const REGISTRY_TABLES: [&TableDef; 4] =
    [&REF_FIELD_TYPES, &REF_FIELDS, &REF_ENUM_VALUES, &REF_ENTITIES];

/// Scalar value tables, in creation order.
pub const SCALAR_TABLES: [&TableDef; 10] = [
    &STORE_TEXT,
    &STORE_INTEGER,
    &STORE_LONG,
    &STORE_FLOAT,
    &STORE_DOUBLE,
    &STORE_DATE_TIME,
    &STORE_ZONED_DATE_TIME,
    &STORE_TIME,
    &STORE_BOOLEAN,
    &STORE_BLOB,
];

/// Array value tables, in creation order.
pub const ARRAY_TABLES: [&TableDef; 6] = [
    &STORE_TEXT_ARRAY,
    &STORE_INTEGER_ARRAY,
    &STORE_LONG_ARRAY,
    &STORE_FLOAT_ARRAY,
    &STORE_DOUBLE_ARRAY,
    &STORE_DATE_TIME_ARRAY,
];

/// Every component in dependency order: registries, entity registry
/// bindings, overview and binding tables, scalar tables, array tables, the
/// audit log, indexes, stored procedures and finally triggers.
///
/// Procedures are listed for every engine; callers skip them when the
/// dialect has no procedural SQL.
pub fn bootstrap_order() -> Vec<Component> {
    let mut order: Vec<Component> = REGISTRY_TABLES.into_iter().map(Component::Table).collect();
    order.push(Component::Table(&BIND_ENTITY_FIELDS));
    order.push(Component::Table(&BIND_ENTITY_ENUMS));
    order.push(Component::Table(&STORE_ENTITY_OVERVIEW));
    order.push(Component::Table(&STORE_ENTITY_BINDING));
    order.extend(SCALAR_TABLES.into_iter().map(Component::Table));
    order.extend(ARRAY_TABLES.into_iter().map(Component::Table));
    order.push(Component::Table(&STORE_OLD_FIELD_VALUES));
    order.push(Component::Index(&IX_ENTITY_OVERVIEW_ENTITY_ID));
    order.push(Component::Index(&IX_ENTITY_BINDING_PARENT));
    order.push(Component::Index(&IX_OLD_FIELD_VALUES_ENTITY));
    order.extend(Upsert::ALL.into_iter().map(Component::Procedure));
    order.push(Component::CascadeTrigger);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_order_registries_first() {
        let order = bootstrap_order();
        let pos = |name: &str| order.iter().position(|c| c.name() == name).unwrap();

        assert!(pos("RefFields") < pos("RefEntities"));
        assert!(pos("RefEntities") < pos("BindEntityFields"));
        assert!(pos("BindEntityEnums") < pos("StoreEntityOverview"));
        assert!(pos("StoreEntityBinding") < pos("StoreText"));
        assert!(pos("StoreBlob") < pos("StoreTextArray"));
        assert!(pos("StoreDateTimeArray") < pos("StoreOldFieldValues"));
        assert!(pos("StoreOldFieldValues") < pos("procStoreText"));
        assert_eq!(order.last(), Some(&Component::CascadeTrigger));
    }

    #[test]
    fn test_component_names_unique() {
        let order = bootstrap_order();
        let mut names: Vec<&str> = order.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), order.len());
    }

    #[test]
    fn test_upsert_columns_cover_keys() {
        for upsert in Upsert::ALL {
            let def = upsert.def();
            for key in def.key_columns {
                assert!(def.columns.contains(key), "{:?} key {} missing", upsert, key);
            }
            for col in def.columns {
                assert!(def.table.column(col).is_some(), "{:?} column {} unknown", upsert, col);
            }
        }
    }

    #[test]
    fn test_array_tables_keyed_by_sequence() {
        for table in ARRAY_TABLES {
            assert_eq!(table.primary_key, &["EntityGuid", "FieldId", "Sequence"]);
        }
    }
}
