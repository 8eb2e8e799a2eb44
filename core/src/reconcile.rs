use std::collections::BTreeMap;

use serde::Serialize;

use crate::buffer::EditBuffer;
use crate::cache::ObservationCache;
use crate::models::{EntityKey, FieldValue, MuscleGroup, Snapshot};
use crate::schema::{EXERCISE_PREFIX, EntitySchema, PREDICTION_PREFIX, RPE_FIELD};

/// Overlay staged edits on the cached snapshot, falling back to structural
/// defaults. Pure: the same cache and buffer always give the same view.
///
/// Plan fields (foods, exercises) only show when the cached snapshot has
/// them; an edit never adds a key the day's plan does not list.
#[must_use]
pub fn view(cache: &ObservationCache, buffer: &EditBuffer, key: EntityKey) -> Snapshot {
    let schema = EntitySchema::for_kind(key.kind);
    let base = cache.get(key).cloned().unwrap_or_default();
    let mut merged = schema.normalize(base);
    for (field, value) in buffer.peek(key) {
        if schema.is_plan_field(&field) && !merged.contains(&field) {
            continue;
        }
        merged.insert(field, value);
    }
    merged
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChecklistView {
    pub items: BTreeMap<String, bool>,
}

impl From<&Snapshot> for ChecklistView {
    fn from(snapshot: &Snapshot) -> Self {
        let items = snapshot
            .iter()
            .filter_map(|(food, value)| value.as_flag().map(|done| (food.to_string(), done)))
            .collect();
        Self { items }
    }
}

/// Intensity for every muscle group; always six entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SorenessView {
    levels: [u8; 6],
}

impl SorenessView {
    #[must_use]
    pub fn from_levels(levels: [u8; 6]) -> Self {
        Self {
            levels: levels.map(|l| l.min(10)),
        }
    }

    #[must_use]
    pub fn get(&self, group: MuscleGroup) -> u8 {
        self.levels[group.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (MuscleGroup, u8)> + '_ {
        MuscleGroup::ALL.into_iter().map(|g| (g, self.get(g)))
    }
}

impl From<&Snapshot> for SorenessView {
    fn from(snapshot: &Snapshot) -> Self {
        let mut levels = [0u8; 6];
        for group in MuscleGroup::ALL {
            levels[group.index()] = snapshot
                .get(group.as_str())
                .and_then(FieldValue::as_level)
                .unwrap_or(0);
        }
        Self::from_levels(levels)
    }
}

impl Serialize for SorenessView {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<&str, u8> = self.iter().map(|(g, l)| (g.as_str(), l)).collect();
        map.serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkoutView {
    pub exercises: BTreeMap<String, bool>,
    pub rpe: Option<u8>,
    pub predicted: BTreeMap<MuscleGroup, u8>,
}

impl From<&Snapshot> for WorkoutView {
    fn from(snapshot: &Snapshot) -> Self {
        let mut out = Self::default();
        for (field, value) in snapshot.iter() {
            if field == RPE_FIELD {
                out.rpe = value.as_level();
            } else if let Some(name) = field.strip_prefix(EXERCISE_PREFIX) {
                if let Some(done) = value.as_flag() {
                    out.exercises.insert(name.to_string(), done);
                }
            } else if let Some(group) = field.strip_prefix(PREDICTION_PREFIX) {
                if let (Ok(group), Some(level)) = (group.parse::<MuscleGroup>(), value.as_level()) {
                    out.predicted.insert(group, level);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::models::{EntityKind, FieldKey};

    fn soreness_key() -> EntityKey {
        EntityKey::new("2024-06-15".parse().unwrap(), EntityKind::Soreness)
    }

    #[test]
    fn test_view_overlays_buffer_on_cache() {
        let mut cache = ObservationCache::new();
        let mut buffer = EditBuffer::new();
        let mut snap = Snapshot::new();
        snap.insert("chest", FieldValue::Level(4));
        snap.insert("legs", FieldValue::Level(2));
        cache.replace(soreness_key(), snap);
        buffer.stage(
            FieldKey::new(soreness_key(), "legs"),
            FieldValue::Level(9),
            Instant::now(),
        );

        let v = SorenessView::from(&view(&cache, &buffer, soreness_key()));
        assert_eq!(v.get(MuscleGroup::Chest), 4);
        assert_eq!(v.get(MuscleGroup::Legs), 9);
        assert_eq!(v.get(MuscleGroup::Arms), 0);
    }

    #[test]
    fn test_view_without_cache_uses_defaults() {
        let cache = ObservationCache::new();
        let buffer = EditBuffer::new();
        let snap = view(&cache, &buffer, soreness_key());
        assert_eq!(snap.len(), 6);
        assert!(snap.iter().all(|(_, v)| v == FieldValue::Level(0)));

        let checklist = view(
            &cache,
            &buffer,
            EntityKey::new(soreness_key().day, EntityKind::Checklist),
        );
        assert!(checklist.is_empty());
    }

    #[test]
    fn test_view_is_idempotent() {
        let mut cache = ObservationCache::new();
        let mut buffer = EditBuffer::new();
        let mut snap = Snapshot::new();
        snap.insert("back", FieldValue::Level(6));
        cache.replace(soreness_key(), snap);
        buffer.stage(
            FieldKey::new(soreness_key(), "core"),
            FieldValue::Level(5),
            Instant::now(),
        );

        let first = view(&cache, &buffer, soreness_key());
        let second = view(&cache, &buffer, soreness_key());
        assert_eq!(first, second);
    }

    #[test]
    fn test_workout_view_projection() {
        let mut snap = Snapshot::new();
        snap.insert("exercise:Squat", FieldValue::Flag(true));
        snap.insert("exercise:Row", FieldValue::Flag(false));
        snap.insert("rpe", FieldValue::Level(8));
        snap.insert("predicted:legs", FieldValue::Level(7));

        let v = WorkoutView::from(&snap);
        assert_eq!(v.exercises.len(), 2);
        assert_eq!(v.exercises.get("Squat"), Some(&true));
        assert_eq!(v.rpe, Some(8));
        assert_eq!(v.predicted.get(&MuscleGroup::Legs), Some(&7));
    }
}
