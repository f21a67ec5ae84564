//! # eav-store
//!
//! Entity-attribute-value persistence for typed objects over SQLite,
//! PostgreSQL, SQL Server and MySQL.
//!
//! This library provides:
//!
//! - **Schema bootstrap**: idempotent, best-effort provisioning of the EAV
//!   tables, indexes, stored procedures and triggers
//! - **Registration** of entity types, fields and enum values
//! - **Batched saves** with one transaction per property category (or one
//!   for the whole save in strict mode), optional audit logging and
//!   recursive saving and binding of nested entities
//! - **Filters** that compose predicate groups over stored values and hand
//!   matching GUIDs to a loader
//! - **Report tables**: flat, one-row-per-entity tables kept in step with
//!   saves
//!
//! ## Example
//!
//! ```rust,no_run
//! use eav_store::{Config, Database, Entity};
//!
//! #[tokio::main]
//! async fn main() -> eav_store::Result<()> {
//!     let config = Config::load("eav.yaml")?;
//!     let db = Database::open(config)?;
//!     db.initialize().await?;
//!
//!     let mut person = Entity::new(1);
//!     person.properties.strings.insert(10, "Ada".to_string());
//!     let report = db.save(std::slice::from_mut(&mut person), 0).await?;
//!     println!("Wrote {} rows", report.rows_written());
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod core;
pub mod database;
pub mod drivers;
pub mod error;
pub mod filter;
pub mod registry;
pub mod save;
pub mod tables;

// Re-exports for convenient access
pub use bootstrap::{BootstrapFailure, BootstrapReport};
pub use config::{Config, ConnectionProperties, EngineConfig, RebindPolicy, WriteMode};
pub use crate::core::{
    Entity, EntityId, EntityOverview, Field, FieldCatalog, FieldEnum, FieldId, FieldType,
    SaveEvent, SaveListener, SqlValue,
};
pub use database::{ComponentStatus, Database, HealthCheckResult};
pub use drivers::Engine;
pub use error::{Result, StoreError};
pub use filter::{EntityLoader, Filter, FilterValue};
pub use registry::EntityDescriptor;
pub use save::{Category, CategoryFailure, CategoryOutcome, SaveReport};
pub use tables::{ReportColumn, ReportTable, UniqueBy};
