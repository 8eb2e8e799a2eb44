use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::models::{EntityKey, FieldKey, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EditId(u64);

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A user-authored change not yet confirmed by the store.
#[derive(Debug, Clone)]
pub struct PendingEdit {
    pub id: EditId,
    pub key: FieldKey,
    pub value: FieldValue,
    pub submitted_at: Instant,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    /// The edit was current and has been removed.
    Cleared,
    /// A newer edit replaced this one; nothing changed.
    Superseded,
    /// The edit was current and failed; the field falls back to the cache.
    Reverted(PendingEdit),
}

/// Staged edits, at most one per field. The newest local edit always wins.
#[derive(Debug, Default)]
pub struct EditBuffer {
    next_id: u64,
    edits: HashMap<FieldKey, PendingEdit>,
    index: HashMap<EditId, FieldKey>,
    status: HashMap<FieldKey, FieldStatus>,
}

impl EditBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` for `key`, replacing any older unconfirmed edit.
    pub fn stage(&mut self, key: FieldKey, value: FieldValue, now: Instant) -> EditId {
        self.next_id += 1;
        let id = EditId(self.next_id);
        let edit = PendingEdit {
            id,
            key: key.clone(),
            value,
            submitted_at: now,
            attempts: 0,
        };
        if let Some(old) = self.edits.insert(key.clone(), edit) {
            self.index.remove(&old.id);
        }
        self.index.insert(id, key.clone());
        self.status.insert(key, FieldStatus::Pending);
        id
    }

    /// Values of every staged edit for one entity.
    #[must_use]
    pub fn peek(&self, entity: EntityKey) -> BTreeMap<String, FieldValue> {
        self.edits
            .values()
            .filter(|e| e.key.entity == entity)
            .map(|e| (e.key.field.clone(), e.value))
            .collect()
    }

    #[must_use]
    pub fn current(&self, key: &FieldKey) -> Option<&PendingEdit> {
        self.edits.get(key)
    }

    #[must_use]
    pub fn is_current(&self, id: EditId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn record_attempt(&mut self, id: EditId) -> Option<u32> {
        let key = self.index.get(&id)?;
        let edit = self.edits.get_mut(key)?;
        edit.attempts += 1;
        Some(edit.attempts)
    }

    /// Settle an edit. Identity, not value, decides whether it is still current.
    pub fn resolve(&mut self, id: EditId, outcome: Outcome) -> Resolution {
        let Some(key) = self.index.remove(&id) else {
            return Resolution::Superseded;
        };
        let Some(edit) = self.edits.remove(&key) else {
            return Resolution::Superseded;
        };
        match outcome {
            Outcome::Confirmed => {
                self.status.insert(key, FieldStatus::Confirmed);
                Resolution::Cleared
            }
            Outcome::Failed => {
                self.status.insert(key, FieldStatus::Failed);
                Resolution::Reverted(edit)
            }
        }
    }

    /// Remove every edit of `entity` whose field matches `doomed`, along with
    /// its status. A request already in flight for one resolves as superseded.
    pub fn discard(
        &mut self,
        entity: EntityKey,
        doomed: impl Fn(&str) -> bool,
    ) -> Vec<PendingEdit> {
        let keys: Vec<FieldKey> = self
            .edits
            .keys()
            .filter(|k| k.entity == entity && doomed(&k.field))
            .cloned()
            .collect();
        let mut dropped = Vec::with_capacity(keys.len());
        for key in keys {
            self.status.remove(&key);
            if let Some(edit) = self.edits.remove(&key) {
                self.index.remove(&edit.id);
                dropped.push(edit);
            }
        }
        dropped
    }

    #[must_use]
    pub fn status(&self, key: &FieldKey) -> Option<FieldStatus> {
        self.status.get(key).copied()
    }

    #[must_use]
    pub fn statuses(&self, entity: EntityKey) -> BTreeMap<String, FieldStatus> {
        self.status
            .iter()
            .filter(|(k, _)| k.entity == entity)
            .map(|(k, s)| (k.field.clone(), *s))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;

    fn legs() -> FieldKey {
        FieldKey::new(
            EntityKey::new("2024-06-15".parse().unwrap(), EntityKind::Soreness),
            "legs",
        )
    }

    #[test]
    fn test_stage_overwrites_same_field() {
        let mut buf = EditBuffer::new();
        let now = Instant::now();
        let a = buf.stage(legs(), FieldValue::Level(3), now);
        let b = buf.stage(legs(), FieldValue::Level(7), now);

        assert_ne!(a, b);
        assert_eq!(buf.len(), 1);
        assert!(!buf.is_current(a));
        assert_eq!(buf.current(&legs()).unwrap().value, FieldValue::Level(7));
        assert_eq!(
            buf.peek(legs().entity).get("legs"),
            Some(&FieldValue::Level(7))
        );
    }

    #[test]
    fn test_stale_confirmation_does_not_clear_newer_edit() {
        let mut buf = EditBuffer::new();
        let now = Instant::now();
        let a = buf.stage(legs(), FieldValue::Level(3), now);
        let b = buf.stage(legs(), FieldValue::Level(7), now);

        assert!(matches!(
            buf.resolve(a, Outcome::Confirmed),
            Resolution::Superseded
        ));
        assert_eq!(buf.current(&legs()).unwrap().id, b);
        assert_eq!(buf.status(&legs()), Some(FieldStatus::Pending));

        assert!(matches!(
            buf.resolve(b, Outcome::Confirmed),
            Resolution::Cleared
        ));
        assert!(buf.is_empty());
        assert_eq!(buf.status(&legs()), Some(FieldStatus::Confirmed));
    }

    #[test]
    fn test_discard_drops_matching_fields_only() {
        let mut buf = EditBuffer::new();
        let now = Instant::now();
        let chest = FieldKey::new(legs().entity, "chest");
        let a = buf.stage(legs(), FieldValue::Level(3), now);
        buf.stage(chest.clone(), FieldValue::Level(5), now);

        let dropped = buf.discard(legs().entity, |field| field == "legs");
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, a);
        assert!(!buf.is_current(a));
        assert_eq!(buf.status(&legs()), None);
        assert!(matches!(
            buf.resolve(a, Outcome::Confirmed),
            Resolution::Superseded
        ));
        assert_eq!(buf.current(&chest).unwrap().value, FieldValue::Level(5));
    }

    #[test]
    fn test_failed_edit_is_reverted() {
        let mut buf = EditBuffer::new();
        let id = buf.stage(legs(), FieldValue::Level(9), Instant::now());
        assert_eq!(buf.record_attempt(id), Some(1));

        match buf.resolve(id, Outcome::Failed) {
            Resolution::Reverted(edit) => {
                assert_eq!(edit.value, FieldValue::Level(9));
                assert_eq!(edit.attempts, 1);
            }
            other => panic!("expected reversion, got {other:?}"),
        }
        assert!(buf.peek(legs().entity).is_empty());
        assert_eq!(buf.status(&legs()), Some(FieldStatus::Failed));

        // Resolving twice is harmless
        assert!(matches!(
            buf.resolve(id, Outcome::Failed),
            Resolution::Superseded
        ));
    }
}
