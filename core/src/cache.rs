use std::collections::{BTreeSet, HashMap};

use crate::models::{DerivedHistory, EntityKey, FieldValue, Snapshot};
use crate::schema::Aggregate;

/// Last-known-good store state: one snapshot per (day, entity) plus the
/// aggregate histories and whether each is still fresh.
#[derive(Debug, Default)]
pub struct ObservationCache {
    snapshots: HashMap<EntityKey, Snapshot>,
    aggregates: HashMap<Aggregate, DerivedHistory>,
    stale: BTreeSet<Aggregate>,
}

impl ObservationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: EntityKey) -> Option<&Snapshot> {
        self.snapshots.get(&key)
    }

    #[must_use]
    pub fn contains(&self, key: EntityKey) -> bool {
        self.snapshots.contains_key(&key)
    }

    /// Wholesale replacement after a successful full fetch.
    pub fn replace(&mut self, key: EntityKey, snapshot: Snapshot) {
        self.snapshots.insert(key, snapshot);
    }

    /// Field-level merge after a successful single-field write. An entity
    /// never fetched stays unloaded; returns whether anything was merged.
    pub fn merge_field(&mut self, key: EntityKey, field: &str, value: FieldValue) -> bool {
        let Some(snapshot) = self.snapshots.get_mut(&key) else {
            return false;
        };
        snapshot.insert(field, value);
        true
    }

    #[must_use]
    pub fn aggregate(&self, aggregate: Aggregate) -> Option<&DerivedHistory> {
        self.aggregates.get(&aggregate)
    }

    pub fn store_aggregate(&mut self, aggregate: Aggregate, history: DerivedHistory) {
        self.aggregates.insert(aggregate, history);
        self.stale.remove(&aggregate);
    }

    pub fn invalidate(&mut self, aggregate: Aggregate) {
        self.stale.insert(aggregate);
    }

    /// An aggregate never fetched counts as stale.
    #[must_use]
    pub fn is_stale(&self, aggregate: Aggregate) -> bool {
        self.stale.contains(&aggregate) || !self.aggregates.contains_key(&aggregate)
    }

    #[must_use]
    pub fn stale_aggregates(&self) -> Vec<Aggregate> {
        Aggregate::ALL
            .into_iter()
            .filter(|a| self.is_stale(*a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;

    fn key(kind: EntityKind) -> EntityKey {
        EntityKey::new("2024-06-15".parse().unwrap(), kind)
    }

    #[test]
    fn test_replace_then_merge() {
        let mut cache = ObservationCache::new();
        let mut snap = Snapshot::new();
        snap.insert("chest", FieldValue::Level(3));
        snap.insert("legs", FieldValue::Level(0));
        cache.replace(key(EntityKind::Soreness), snap);

        cache.merge_field(key(EntityKind::Soreness), "legs", FieldValue::Level(8));
        let got = cache.get(key(EntityKind::Soreness)).unwrap();
        assert_eq!(got.get("chest"), Some(FieldValue::Level(3)));
        assert_eq!(got.get("legs"), Some(FieldValue::Level(8)));

        // Replacement is wholesale: fields absent from the new snapshot disappear
        let mut fresh = Snapshot::new();
        fresh.insert("chest", FieldValue::Level(1));
        cache.replace(key(EntityKind::Soreness), fresh);
        let got = cache.get(key(EntityKind::Soreness)).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn test_aggregate_freshness() {
        let mut cache = ObservationCache::new();
        assert_eq!(cache.stale_aggregates().len(), 3);

        cache.store_aggregate(Aggregate::Dashboard, DerivedHistory::default());
        assert!(!cache.is_stale(Aggregate::Dashboard));

        cache.invalidate(Aggregate::Dashboard);
        assert!(cache.is_stale(Aggregate::Dashboard));
        // Stale data is still readable until the refetch lands
        assert!(cache.aggregate(Aggregate::Dashboard).is_some());
    }

    #[test]
    fn test_merge_into_unloaded_entity_is_ignored() {
        let mut cache = ObservationCache::new();
        assert!(!cache.merge_field(key(EntityKind::Workout), "rpe", FieldValue::Level(7)));
        assert!(!cache.contains(key(EntityKind::Workout)));
    }
}
