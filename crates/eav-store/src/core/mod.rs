//! Core abstractions for the persistence engine.
//!
//! - [`schema`]: the fixed EAV table, index, procedure and trigger catalog
//! - [`field`]: field definitions and the read-only field catalog
//! - [`entity`]: in-memory entities and save hooks
//! - [`value`]: SQL values bound as statement parameters
//! - [`traits`]: the `Dialect` and `DbConnection` seams implemented per engine
//!
//! Nothing in `core` performs I/O; drivers under `drivers/` implement the
//! traits for each engine.

pub mod entity;
pub mod field;
pub mod schema;
pub mod traits;
pub mod value;

pub use entity::{
    Entity, EntityId, EntityOverview, ObjectArrayProperty, ObjectProperty, Properties, SaveEvent,
    SaveListener,
};
pub use field::{Field, FieldCatalog, FieldEnum, FieldId, FieldType};
pub use schema::{Component, ComponentKind, Upsert};
pub use traits::{DbConnection, Dialect, ExistsQuery};
pub use value::{Row, SqlNullType, SqlValue};
