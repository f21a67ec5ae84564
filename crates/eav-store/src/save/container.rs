//! Per-batch staging of property maps.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::core::entity::{Entity, EntityOverview, ObjectArrayProperty, ObjectProperty};
use crate::core::field::FieldId;

/// Property maps of one category, keyed by entity GUID in batch order.
pub(crate) type Staged<'e, T> = Vec<(&'e str, &'e BTreeMap<FieldId, T>)>;

/// Everything one batch writes, borrowed from its entities.
#[derive(Default)]
pub(crate) struct SaveContainer<'e> {
    pub overviews: Vec<&'e EntityOverview>,
    pub booleans: Staged<'e, bool>,
    pub integers: Staged<'e, i32>,
    pub longs: Staged<'e, i64>,
    pub floats: Staged<'e, f32>,
    pub doubles: Staged<'e, f64>,
    pub strings: Staged<'e, String>,
    pub blobs: Staged<'e, Vec<u8>>,
    pub date_times: Staged<'e, NaiveDateTime>,
    pub dates: Staged<'e, NaiveDate>,
    pub zoned_date_times: Staged<'e, DateTime<FixedOffset>>,
    pub times: Staged<'e, NaiveTime>,
    pub string_arrays: Staged<'e, Vec<String>>,
    pub integer_arrays: Staged<'e, Vec<i32>>,
    pub long_arrays: Staged<'e, Vec<i64>>,
    pub float_arrays: Staged<'e, Vec<f32>>,
    pub double_arrays: Staged<'e, Vec<f64>>,
    pub date_time_arrays: Staged<'e, Vec<NaiveDateTime>>,
    pub enums: Staged<'e, Vec<String>>,
    pub objects: Staged<'e, ObjectProperty>,
    pub object_arrays: Staged<'e, ObjectArrayProperty>,
}

impl<'e> SaveContainer<'e> {
    pub fn stage<I>(entities: I) -> Self
    where
        I: IntoIterator<Item = &'e Entity>,
    {
        let mut container = Self::default();
        for entity in entities {
            container.push(entity);
        }
        container
    }

    fn push(&mut self, entity: &'e Entity) {
        let guid = entity.guid();
        let p = &entity.properties;

        self.overviews.push(&entity.overview);
        self.booleans.push((guid, &p.booleans));
        self.integers.push((guid, &p.integers));
        self.longs.push((guid, &p.longs));
        self.floats.push((guid, &p.floats));
        self.doubles.push((guid, &p.doubles));
        self.strings.push((guid, &p.strings));
        self.blobs.push((guid, &p.blobs));
        self.date_times.push((guid, &p.date_times));
        self.dates.push((guid, &p.dates));
        self.zoned_date_times.push((guid, &p.zoned_date_times));
        self.times.push((guid, &p.times));
        self.string_arrays.push((guid, &p.string_arrays));
        self.integer_arrays.push((guid, &p.integer_arrays));
        self.long_arrays.push((guid, &p.long_arrays));
        self.float_arrays.push((guid, &p.float_arrays));
        self.double_arrays.push((guid, &p.double_arrays));
        self.date_time_arrays.push((guid, &p.date_time_arrays));
        self.enums.push((guid, &p.enums));
        self.objects.push((guid, &p.objects));
        self.object_arrays.push((guid, &p.object_arrays));
    }
}

/// Flatten staged maps into `(guid, field, value)` triples.
pub(crate) fn entries<'e, T>(
    staged: &'e Staged<'e, T>,
) -> impl Iterator<Item = (&'e str, FieldId, &'e T)> + 'e {
    staged
        .iter()
        .flat_map(|(guid, map)| map.iter().map(move |(field, value)| (*guid, *field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_keeps_batch_order() {
        let mut first = Entity::with_guid(1, "g1");
        first.properties.strings.insert(10, "a".into());
        let mut second = Entity::with_guid(1, "g2");
        second.properties.strings.insert(10, "b".into());
        second.properties.strings.insert(11, "c".into());

        let entities = [first, second];
        let container = SaveContainer::stage(entities.iter());

        assert_eq!(container.overviews.len(), 2);
        let flat: Vec<_> = entries(&container.strings)
            .map(|(g, f, v)| (g, f, v.as_str()))
            .collect();
        assert_eq!(flat, vec![("g1", 10, "a"), ("g2", 10, "b"), ("g2", 11, "c")]);
    }
}
