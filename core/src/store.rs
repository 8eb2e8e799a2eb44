use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::debug;

use crate::db::Database;
use crate::error::WriteFailure;
use crate::models::{DayKey, DerivedHistory, EntityKey, FieldValue, Snapshot, WriteAck};
use crate::remote::{PlanStore, RemoteStore};
use crate::schema::EntitySchema;

/// The local `SQLite` database behind the [`RemoteStore`] interface. Used by
/// the CLI when no remote is configured and by `rollin serve`.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self, key: EntityKey) -> Result<Snapshot> {
        self.db().get_snapshot(key)
    }

    /// Validate and persist one field. Plan fields are checked against what
    /// the day actually has; storage errors are transient.
    pub fn write(
        &self,
        key: EntityKey,
        field: &str,
        value: FieldValue,
    ) -> Result<WriteAck, WriteFailure> {
        let db = self.db();
        let schema = EntitySchema::for_kind(key.kind);
        let known = db.get_snapshot(key).map_err(storage_failure)?;
        let value = schema
            .validate(field, value, Some(&known))
            .map_err(|e| WriteFailure::rejected(&e))?;
        db.upsert_field(key, field, value).map_err(storage_failure)?;
        debug!(entity = %key, field, %value, "stored field");
        Ok(WriteAck {
            field: field.to_string(),
            value,
        })
    }

    pub fn history(&self, range_days: u32, today: DayKey) -> Result<DerivedHistory> {
        self.db().derived_history(range_days, today)
    }

    pub fn set_protocol(&self, day: DayKey, foods: &[String]) -> Result<()> {
        self.db().set_protocol(day, foods)
    }

    pub fn set_workout_plan(&self, day: DayKey, exercises: &[String]) -> Result<()> {
        self.db().set_workout_plan(day, exercises)
    }
}

fn storage_failure(err: anyhow::Error) -> WriteFailure {
    WriteFailure::Transient(format!("{err:#}"))
}

impl RemoteStore for LocalStore {
    async fn fetch_snapshot(&self, key: EntityKey) -> Result<Snapshot> {
        self.snapshot(key)
    }

    async fn write_field(
        &self,
        key: EntityKey,
        field: String,
        value: FieldValue,
    ) -> Result<WriteAck, WriteFailure> {
        self.write(key, &field, value)
    }

    async fn fetch_derived_history(&self, range_days: u32) -> Result<DerivedHistory> {
        self.history(range_days, DayKey::today())
    }
}

impl PlanStore for LocalStore {
    async fn record_protocol(&self, day: DayKey, foods: Vec<String>) -> Result<()> {
        self.set_protocol(day, &foods)
    }

    async fn record_workout_plan(&self, day: DayKey, exercises: Vec<String>) -> Result<()> {
        self.set_workout_plan(day, &exercises)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, MuscleGroup};
    use crate::scheduler::SyncConfig;
    use crate::session::SyncSession;

    fn day() -> DayKey {
        "2024-06-15".parse().unwrap()
    }

    #[test]
    fn test_out_of_range_write_is_permanent() {
        let store = LocalStore::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Soreness);
        let err = store.write(key, "legs", FieldValue::Level(11)).unwrap_err();
        assert_eq!(
            err,
            WriteFailure::Permanent {
                status: 400,
                message: "invalid value for 'legs': 11 is outside 0-10".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_food_is_not_found() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set_protocol(day(), &["eggs".to_string()]).unwrap();
        let key = EntityKey::new(day(), EntityKind::Checklist);
        let err = store.write(key, "pizza", FieldValue::Flag(true)).unwrap_err();
        assert!(matches!(err, WriteFailure::Permanent { status: 404, .. }));
        assert!(store.write(key, "eggs", FieldValue::Flag(true)).is_ok());
    }

    #[test]
    fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollin.db");
        let key = EntityKey::new(day(), EntityKind::Soreness);
        {
            let store = LocalStore::open(&path).unwrap();
            store.write(key, "back", FieldValue::Level(6)).unwrap();
        }
        let store = LocalStore::open(&path).unwrap();
        assert_eq!(
            store.snapshot(key).unwrap().get("back"),
            Some(FieldValue::Level(6))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_round_trip_through_local_store() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        store
            .record_protocol(day(), vec!["eggs".to_string(), "oats".to_string()])
            .await
            .unwrap();

        let mut session = SyncSession::new(Arc::clone(&store), SyncConfig::default());
        session.load_day(day()).await.unwrap();
        let now = session.now();
        let sync = session.sync_mut();
        sync.set_food(day(), "eggs", true, now).unwrap();
        sync.set_soreness(day(), MuscleGroup::Legs, 12, now).unwrap();
        let reversions = session.settle().await.unwrap();

        assert!(reversions.is_empty());
        let checklist = store
            .snapshot(EntityKey::new(day(), EntityKind::Checklist))
            .unwrap();
        assert_eq!(checklist.get("eggs"), Some(FieldValue::Flag(true)));
        // Clamped before staging
        let soreness = store
            .snapshot(EntityKey::new(day(), EntityKind::Soreness))
            .unwrap();
        assert_eq!(soreness.get("legs"), Some(FieldValue::Level(10)));
        assert_eq!(session.sync().dashboard(day()).checklist_completion, 50);
    }
}
