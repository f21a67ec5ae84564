//! In-memory entities handed to the save pipeline.
//!
//! An [`Entity`] is a plain bag of typed property maps keyed by field id.
//! The pipeline only ever writes to it to stamp the last-modified time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::core::field::FieldId;

/// Integer identifying an entity's declared type.
pub type EntityId = i64;

/// One row of `StoreEntityOverview`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityOverview {
    pub entity_guid: String,
    pub entity_id: EntityId,
    pub date_created: NaiveDateTime,
    pub date_modified: NaiveDateTime,
}

impl EntityOverview {
    pub fn new(entity_id: EntityId) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            entity_guid: Uuid::new_v4().to_string(),
            entity_id,
            date_created: now,
            date_modified: now,
        }
    }
}

/// A single-valued object reference. The child type is declared up front so
/// an unset reference still names the type it would bind.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub child_entity_id: EntityId,
    pub value: Option<Box<Entity>>,
}

/// A list-valued object reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectArrayProperty {
    pub child_entity_id: EntityId,
    pub items: Vec<Entity>,
}

/// Typed property maps, one per category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub booleans: BTreeMap<FieldId, bool>,
    pub integers: BTreeMap<FieldId, i32>,
    pub longs: BTreeMap<FieldId, i64>,
    pub floats: BTreeMap<FieldId, f32>,
    pub doubles: BTreeMap<FieldId, f64>,
    pub strings: BTreeMap<FieldId, String>,
    pub blobs: BTreeMap<FieldId, Vec<u8>>,
    pub date_times: BTreeMap<FieldId, NaiveDateTime>,
    pub dates: BTreeMap<FieldId, NaiveDate>,
    pub zoned_date_times: BTreeMap<FieldId, DateTime<FixedOffset>>,
    pub times: BTreeMap<FieldId, NaiveTime>,
    pub string_arrays: BTreeMap<FieldId, Vec<String>>,
    pub integer_arrays: BTreeMap<FieldId, Vec<i32>>,
    pub long_arrays: BTreeMap<FieldId, Vec<i64>>,
    pub float_arrays: BTreeMap<FieldId, Vec<f32>>,
    pub double_arrays: BTreeMap<FieldId, Vec<f64>>,
    pub date_time_arrays: BTreeMap<FieldId, Vec<NaiveDateTime>>,
    /// Enum values by text; persisted as ordinals of the field's declared values.
    pub enums: BTreeMap<FieldId, Vec<String>>,
    pub objects: BTreeMap<FieldId, ObjectProperty>,
    pub object_arrays: BTreeMap<FieldId, ObjectArrayProperty>,
}

/// Arguments passed to [`SaveListener`] callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveEvent {
    /// Zero-based batch number within the save call.
    pub batch: usize,
    /// Zero-based position of the entity within its batch.
    pub index: usize,
    pub batch_size: usize,
    pub entity_guid: String,
}

/// Optional notification hooks around an entity's save.
///
/// Hooks cannot influence what is persisted.
pub trait SaveListener: Send + Sync {
    fn on_pre_save(&self, _event: &SaveEvent) {}

    fn on_post_save(&self, _event: &SaveEvent) {}
}

/// A typed object to persist.
#[derive(Clone)]
pub struct Entity {
    pub overview: EntityOverview,
    pub properties: Properties,
    listener: Option<Arc<dyn SaveListener>>,
}

impl Entity {
    /// New entity of type `entity_id` with a fresh GUID.
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            overview: EntityOverview::new(entity_id),
            properties: Properties::default(),
            listener: None,
        }
    }

    /// Entity with a caller-supplied GUID, e.g. when re-saving a loaded entity.
    pub fn with_guid(entity_id: EntityId, guid: impl Into<String>) -> Self {
        let mut entity = Self::new(entity_id);
        entity.overview.entity_guid = guid.into();
        entity
    }

    pub fn with_listener(mut self, listener: Arc<dyn SaveListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn guid(&self) -> &str {
        &self.overview.entity_guid
    }

    pub fn entity_id(&self) -> EntityId {
        self.overview.entity_id
    }

    pub fn listener(&self) -> Option<&Arc<dyn SaveListener>> {
        self.listener.as_ref()
    }

    /// Set a single-valued object reference.
    pub fn set_object(&mut self, field_id: FieldId, child: Entity) {
        self.properties.objects.insert(
            field_id,
            ObjectProperty {
                child_entity_id: child.entity_id(),
                value: Some(Box::new(child)),
            },
        );
    }

    /// Set a list-valued object reference of type `child_entity_id`.
    pub fn set_object_array(&mut self, field_id: FieldId, child_entity_id: EntityId, items: Vec<Entity>) {
        self.properties.object_arrays.insert(
            field_id,
            ObjectArrayProperty {
                child_entity_id,
                items,
            },
        );
    }

    /// Every directly referenced child, objects before object arrays.
    pub fn children(&self) -> impl Iterator<Item = &Entity> {
        let objects = self
            .properties
            .objects
            .values()
            .filter_map(|o| o.value.as_deref());
        let arrays = self
            .properties
            .object_arrays
            .values()
            .flat_map(|a| a.items.iter());
        objects.chain(arrays)
    }

    /// Mutable counterpart of [`children`](Self::children).
    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        let Properties {
            objects,
            object_arrays,
            ..
        } = &mut self.properties;
        let objects = objects.values_mut().filter_map(|o| o.value.as_deref_mut());
        let arrays = object_arrays.values_mut().flat_map(|a| a.items.iter_mut());
        objects.chain(arrays)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("overview", &self.overview)
            .field("properties", &self.properties)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Equality covers persisted state only; listeners are ignored.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.overview == other.overview && self.properties == other.properties
    }
}
