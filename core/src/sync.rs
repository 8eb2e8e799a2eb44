use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::buffer::{EditBuffer, EditId, FieldStatus, Outcome, Resolution};
use crate::cache::ObservationCache;
use crate::error::{SyncError, WriteFailure};
use crate::metrics::{self, ComplianceStats, DayDashboard, WeeklyTrend};
use crate::models::{
    DayKey, DerivedHistory, EntityKey, EntityKind, FieldKey, FieldValue, MuscleGroup, Snapshot,
    WriteAck,
};
use crate::reconcile::{self, ChecklistView, SorenessView, WorkoutView};
use crate::scheduler::{MutationScheduler, SyncConfig, Verdict, WriteRequest};
use crate::schema::{Aggregate, EntitySchema, RPE_FIELD, exercise_field, prediction_field};

/// A user edit that could not be persisted and was rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct Reversion {
    pub field: FieldKey,
    pub attempted: FieldValue,
    /// Last confirmed value, or `None` when the field falls back to its default.
    pub restored: Option<FieldValue>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum WriteEvent {
    Confirmed(FieldKey),
    Retrying(FieldKey),
    Reverted(Reversion),
    /// A superseded edit finished; the newer edit is unaffected.
    Ignored(FieldKey),
}

/// Tracking-state synchronizer: owns the observation cache, the edit buffer
/// and the mutation scheduler, and is driven by whoever performs I/O.
///
/// All methods run to completion synchronously. Network completions come back
/// through [`Synchronizer::complete_write`].
#[derive(Debug)]
pub struct Synchronizer {
    cache: ObservationCache,
    buffer: EditBuffer,
    scheduler: MutationScheduler,
    reversions: Vec<Reversion>,
}

impl Synchronizer {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self {
            cache: ObservationCache::new(),
            buffer: EditBuffer::new(),
            scheduler: MutationScheduler::new(config),
            reversions: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        self.scheduler.config()
    }

    // --- Store snapshots ---

    /// Install a freshly fetched snapshot. Staged edits keep priority in the
    /// view, except edits to plan fields the new snapshot no longer lists:
    /// those are discarded unsent and reported as reversions.
    pub fn load(&mut self, key: EntityKey, snapshot: Snapshot) {
        let schema = EntitySchema::for_kind(key.kind);
        let snapshot = schema.normalize(snapshot);
        let orphaned = self.buffer.discard(key, |field| {
            schema.is_plan_field(field) && !snapshot.contains(field)
        });
        for edit in orphaned {
            warn!(field = %edit.key, "dropping edit, field left the day's plan");
            self.reversions.push(Reversion {
                field: edit.key,
                attempted: edit.value,
                restored: None,
                reason: "no longer part of the day's plan".to_string(),
            });
        }
        self.cache.replace(key, snapshot);
    }

    // --- Editing ---

    /// Optimistically stage an edit. Levels are clamped into range; plan
    /// fields (foods, exercises) must exist in the loaded snapshot.
    pub fn stage(
        &mut self,
        key: EntityKey,
        field: &str,
        value: FieldValue,
        now: Instant,
    ) -> Result<EditId, SyncError> {
        let schema = EntitySchema::for_kind(key.kind);
        if schema.is_plan_field(field) && !self.cache.contains(key) {
            return Err(SyncError::NotLoaded {
                kind: key.kind,
                day: key.day.to_string(),
            });
        }
        let value = schema.clamp(field, value);
        let value = schema.validate(field, value, self.cache.get(key))?;

        let field_key = FieldKey::new(key, field);
        let id = self.buffer.stage(field_key.clone(), value, now);
        self.scheduler.touch(field_key.clone(), now);
        debug!(field = %field_key, edit = %id, %value, "staged edit");
        Ok(id)
    }

    pub fn set_food(
        &mut self,
        day: DayKey,
        food: &str,
        consumed: bool,
        now: Instant,
    ) -> Result<EditId, SyncError> {
        self.stage(
            EntityKey::new(day, EntityKind::Checklist),
            food,
            FieldValue::Flag(consumed),
            now,
        )
    }

    pub fn set_soreness(
        &mut self,
        day: DayKey,
        group: MuscleGroup,
        intensity: u8,
        now: Instant,
    ) -> Result<EditId, SyncError> {
        self.stage(
            EntityKey::new(day, EntityKind::Soreness),
            group.as_str(),
            FieldValue::Level(intensity),
            now,
        )
    }

    pub fn set_exercise(
        &mut self,
        day: DayKey,
        exercise: &str,
        done: bool,
        now: Instant,
    ) -> Result<EditId, SyncError> {
        self.stage(
            EntityKey::new(day, EntityKind::Workout),
            &exercise_field(exercise),
            FieldValue::Flag(done),
            now,
        )
    }

    pub fn set_rpe(&mut self, day: DayKey, rpe: u8, now: Instant) -> Result<EditId, SyncError> {
        self.stage(
            EntityKey::new(day, EntityKind::Workout),
            RPE_FIELD,
            FieldValue::Level(rpe),
            now,
        )
    }

    pub fn set_prediction(
        &mut self,
        day: DayKey,
        group: MuscleGroup,
        intensity: u8,
        now: Instant,
    ) -> Result<EditId, SyncError> {
        self.stage(
            EntityKey::new(day, EntityKind::Workout),
            &prediction_field(group),
            FieldValue::Level(intensity),
            now,
        )
    }

    // --- Writes ---

    /// Writes that should be sent now.
    pub fn poll_writes(&mut self, now: Instant) -> Vec<WriteRequest> {
        self.scheduler.ready(&mut self.buffer, now)
    }

    /// Apply the outcome of a write previously returned by [`Self::poll_writes`].
    pub fn complete_write(
        &mut self,
        request: &WriteRequest,
        result: Result<WriteAck, WriteFailure>,
        now: Instant,
    ) -> WriteEvent {
        let entity = request.key.entity;
        let verdict = self.scheduler.finish(
            request,
            result.as_ref().map(|_| ()),
            &self.buffer,
            now,
        );

        match (verdict, result) {
            (Verdict::Succeeded, Ok(ack)) => {
                let schema = EntitySchema::for_kind(entity.kind);
                let listed = self
                    .cache
                    .get(entity)
                    .is_some_and(|s| !schema.is_plan_field(&ack.field) || s.contains(&ack.field));
                if listed {
                    self.cache.merge_field(entity, &ack.field, ack.value);
                }
                for aggregate in schema.invalidates {
                    self.cache.invalidate(*aggregate);
                }
                match self.buffer.resolve(request.edit, Outcome::Confirmed) {
                    Resolution::Cleared => {
                        debug!(field = %request.key, "write confirmed");
                        WriteEvent::Confirmed(request.key.clone())
                    }
                    Resolution::Superseded | Resolution::Reverted(_) => {
                        WriteEvent::Ignored(request.key.clone())
                    }
                }
            }
            (Verdict::Retry, Err(failure)) => {
                warn!(field = %request.key, attempt = request.attempt, %failure, "retrying write");
                WriteEvent::Retrying(request.key.clone())
            }
            (Verdict::GiveUp, Err(failure)) => {
                match self.buffer.resolve(request.edit, Outcome::Failed) {
                    Resolution::Reverted(edit) => {
                        let restored = self
                            .cache
                            .get(entity)
                            .and_then(|s| s.get(&edit.key.field))
                            .or_else(|| {
                                EntitySchema::for_kind(entity.kind).default_value(&edit.key.field)
                            });
                        warn!(field = %request.key, %failure, "write failed, reverting edit");
                        let reversion = Reversion {
                            field: edit.key,
                            attempted: edit.value,
                            restored,
                            reason: failure.to_string(),
                        };
                        self.reversions.push(reversion.clone());
                        WriteEvent::Reverted(reversion)
                    }
                    Resolution::Cleared | Resolution::Superseded => {
                        WriteEvent::Ignored(request.key.clone())
                    }
                }
            }
            _ => WriteEvent::Ignored(request.key.clone()),
        }
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Nothing staged and nothing scheduled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle() && self.buffer.is_empty()
    }

    /// Reversions not yet shown to the user.
    pub fn take_reversions(&mut self) -> Vec<Reversion> {
        std::mem::take(&mut self.reversions)
    }

    // --- Aggregates ---

    #[must_use]
    pub fn stale_aggregates(&self) -> Vec<Aggregate> {
        self.cache.stale_aggregates()
    }

    pub fn store_aggregate(&mut self, aggregate: Aggregate, history: DerivedHistory) {
        self.cache.store_aggregate(aggregate, history);
    }

    #[must_use]
    pub fn aggregate(&self, aggregate: Aggregate) -> Option<&DerivedHistory> {
        self.cache.aggregate(aggregate)
    }

    /// Stats from the 30-day history, with today's figures taken from the
    /// local view when the whole day is loaded.
    #[must_use]
    pub fn compliance_stats(&self, today: DayKey) -> ComplianceStats {
        let history = self
            .cache
            .aggregate(Aggregate::ComplianceStats)
            .cloned()
            .unwrap_or_default();
        let local = self
            .is_day_loaded(today)
            .then(|| self.dashboard(today).as_daily_adherence());
        metrics::compliance_stats(&history, today, local.as_ref())
    }

    /// Seven-day trend: combined adherence from the dashboard history and
    /// competition score from the soreness history, today taken locally when
    /// the whole day is loaded.
    #[must_use]
    pub fn weekly_trend(&self, today: DayKey) -> WeeklyTrend {
        let empty = DerivedHistory::default();
        let dashboard = self.cache.aggregate(Aggregate::Dashboard).unwrap_or(&empty);
        let soreness = self
            .cache
            .aggregate(Aggregate::SorenessSummary)
            .unwrap_or(&empty);
        let local = self
            .is_day_loaded(today)
            .then(|| self.dashboard(today).as_daily_adherence());
        metrics::weekly_trend(dashboard, soreness, today, local.as_ref())
    }

    #[must_use]
    pub fn is_day_loaded(&self, day: DayKey) -> bool {
        EntityKind::ALL
            .into_iter()
            .all(|kind| self.cache.contains(EntityKey::new(day, kind)))
    }

    // --- Views ---

    #[must_use]
    pub fn view(&self, key: EntityKey) -> Snapshot {
        reconcile::view(&self.cache, &self.buffer, key)
    }

    #[must_use]
    pub fn statuses(&self, key: EntityKey) -> BTreeMap<String, FieldStatus> {
        self.buffer.statuses(key)
    }

    #[must_use]
    pub fn checklist(&self, day: DayKey) -> ChecklistView {
        ChecklistView::from(&self.view(EntityKey::new(day, EntityKind::Checklist)))
    }

    #[must_use]
    pub fn soreness(&self, day: DayKey) -> SorenessView {
        SorenessView::from(&self.view(EntityKey::new(day, EntityKind::Soreness)))
    }

    #[must_use]
    pub fn workout(&self, day: DayKey) -> WorkoutView {
        WorkoutView::from(&self.view(EntityKey::new(day, EntityKind::Workout)))
    }

    #[must_use]
    pub fn dashboard(&self, day: DayKey) -> DayDashboard {
        DayDashboard::compute(
            day,
            &self.checklist(day),
            &self.soreness(day),
            &self.workout(day),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::metrics::{completion_percentage, coverage_percentage};

    fn day() -> DayKey {
        "2024-06-15".parse().unwrap()
    }

    fn key(kind: EntityKind) -> EntityKey {
        EntityKey::new(day(), kind)
    }

    fn ack(req: &WriteRequest) -> Result<WriteAck, WriteFailure> {
        Ok(WriteAck {
            field: req.key.field.clone(),
            value: req.value,
        })
    }

    fn loaded() -> Synchronizer {
        let mut sync = Synchronizer::new(SyncConfig::default());
        let mut checklist = Snapshot::new();
        checklist.insert("Bone broth", FieldValue::Flag(false));
        checklist.insert("Eggs", FieldValue::Flag(true));
        sync.load(key(EntityKind::Checklist), checklist);
        sync.load(key(EntityKind::Soreness), Snapshot::new());
        let mut workout = Snapshot::new();
        workout.insert("exercise:Squat", FieldValue::Flag(false));
        sync.load(key(EntityKind::Workout), workout);
        sync
    }

    fn after_debounce(t: Instant) -> Instant {
        t + SyncConfig::default().debounce
    }

    #[test]
    fn test_edit_is_visible_before_any_write() {
        let mut sync = loaded();
        let t0 = Instant::now();
        sync.set_food(day(), "Bone broth", true, t0).unwrap();

        assert_eq!(completion_percentage(&sync.checklist(day()).items), 100);
        assert_eq!(
            sync.statuses(key(EntityKind::Checklist)).get("Bone broth"),
            Some(&FieldStatus::Pending)
        );
        assert!(sync.poll_writes(t0).is_empty());
    }

    #[test]
    fn test_unknown_food_is_rejected() {
        let mut sync = loaded();
        let err = sync
            .set_food(day(), "Pizza", true, Instant::now())
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownField { .. }));
        assert_eq!(sync.checklist(day()).items.len(), 2);
    }

    #[test]
    fn test_checklist_edit_before_load_is_rejected() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        let err = sync
            .set_food(day(), "Bone broth", true, Instant::now())
            .unwrap_err();
        assert!(matches!(err, SyncError::NotLoaded { .. }));
    }

    #[test]
    fn test_soreness_is_clamped_when_staged() {
        let mut sync = loaded();
        sync.set_soreness(day(), MuscleGroup::Legs, 42, Instant::now())
            .unwrap();
        assert_eq!(sync.soreness(day()).get(MuscleGroup::Legs), 10);
    }

    #[test]
    fn test_last_write_wins_over_stale_confirmation() {
        let mut sync = loaded();
        let t0 = Instant::now();
        sync.set_soreness(day(), MuscleGroup::Legs, 3, t0).unwrap();
        let a = sync.poll_writes(after_debounce(t0)).remove(0);

        let t1 = after_debounce(t0);
        sync.set_soreness(day(), MuscleGroup::Legs, 8, t1).unwrap();

        let event = sync.complete_write(&a, ack(&a), t1);
        assert!(matches!(event, WriteEvent::Ignored(_)));
        assert_eq!(sync.soreness(day()).get(MuscleGroup::Legs), 8);

        let b = sync.poll_writes(after_debounce(t1)).remove(0);
        assert_eq!(b.value, FieldValue::Level(8));
        let event = sync.complete_write(&b, ack(&b), after_debounce(t1));
        assert!(matches!(event, WriteEvent::Confirmed(_)));
        assert_eq!(sync.soreness(day()).get(MuscleGroup::Legs), 8);
        assert!(sync.is_idle());
    }

    #[test]
    fn test_permanent_failure_reverts_only_that_field() {
        let mut sync = loaded();
        let t0 = Instant::now();
        sync.set_soreness(day(), MuscleGroup::Legs, 4, t0).unwrap();
        sync.set_soreness(day(), MuscleGroup::Arms, 2, t0).unwrap();
        for req in sync.poll_writes(after_debounce(t0)) {
            sync.complete_write(&req, ack(&req), after_debounce(t0));
        }

        let t1 = after_debounce(t0) + Duration::from_secs(1);
        sync.set_soreness(day(), MuscleGroup::Legs, 9, t1).unwrap();
        sync.set_soreness(day(), MuscleGroup::Arms, 7, t1).unwrap();
        let t2 = after_debounce(t1);
        let writes = sync.poll_writes(t2);
        assert_eq!(writes.len(), 2);

        for req in &writes {
            let result = if req.key.field == "legs" {
                Err(WriteFailure::from_status(422, "intensity rejected"))
            } else {
                ack(req)
            };
            sync.complete_write(req, result, t2);
        }

        let view = sync.soreness(day());
        assert_eq!(view.get(MuscleGroup::Legs), 4);
        assert_eq!(view.get(MuscleGroup::Arms), 7);

        let reversions = sync.take_reversions();
        assert_eq!(reversions.len(), 1);
        assert_eq!(reversions[0].field.field, "legs");
        assert_eq!(reversions[0].attempted, FieldValue::Level(9));
        assert_eq!(reversions[0].restored, Some(FieldValue::Level(4)));

        let statuses = sync.statuses(key(EntityKind::Soreness));
        assert_eq!(statuses.get("legs"), Some(&FieldStatus::Failed));
        assert_eq!(statuses.get("arms"), Some(&FieldStatus::Confirmed));
        assert!(sync.take_reversions().is_empty());
    }

    #[test]
    fn test_transient_failure_then_success_is_invisible() {
        let mut sync = loaded();
        let t0 = Instant::now();
        sync.set_exercise(day(), "Squat", true, t0).unwrap();
        let t1 = after_debounce(t0);
        let first = sync.poll_writes(t1).remove(0);
        let event = sync.complete_write(
            &first,
            Err(WriteFailure::Transient("timed out".to_string())),
            t1,
        );
        assert!(matches!(event, WriteEvent::Retrying(_)));
        assert_eq!(sync.workout(day()).exercises.get("Squat"), Some(&true));

        let retry = sync.poll_writes(t1).remove(0);
        assert_eq!(retry.attempt, 2);
        sync.complete_write(&retry, ack(&retry), t1);
        assert_eq!(sync.workout(day()).exercises.get("Squat"), Some(&true));
        assert!(sync.take_reversions().is_empty());
    }

    #[test]
    fn test_exhausted_retries_revert_to_default() {
        let mut sync = loaded();
        let t0 = Instant::now();
        sync.set_rpe(day(), 7, t0).unwrap();
        let t1 = after_debounce(t0);
        for _ in 0..2 {
            let req = sync.poll_writes(t1).remove(0);
            sync.complete_write(&req, Err(WriteFailure::Transient("503".to_string())), t1);
        }
        assert_eq!(sync.workout(day()).rpe, None);
        let reversions = sync.take_reversions();
        assert_eq!(reversions.len(), 1);
        assert_eq!(reversions[0].restored, None);
    }

    #[test]
    fn test_confirmed_write_invalidates_declared_aggregates() {
        let mut sync = loaded();
        for aggregate in Aggregate::ALL {
            sync.store_aggregate(aggregate, DerivedHistory::default());
        }
        assert!(sync.stale_aggregates().is_empty());

        let t0 = Instant::now();
        sync.set_soreness(day(), MuscleGroup::Chest, 6, t0).unwrap();
        let req = sync.poll_writes(after_debounce(t0)).remove(0);
        sync.complete_write(&req, ack(&req), after_debounce(t0));

        assert_eq!(sync.stale_aggregates(), vec![Aggregate::SorenessSummary]);

        let t1 = after_debounce(t0) + Duration::from_secs(1);
        sync.set_food(day(), "Bone broth", true, t1).unwrap();
        let req = sync.poll_writes(after_debounce(t1)).remove(0);
        sync.complete_write(&req, ack(&req), after_debounce(t1));
        assert_eq!(
            sync.stale_aggregates(),
            vec![
                Aggregate::ComplianceStats,
                Aggregate::SorenessSummary,
                Aggregate::Dashboard
            ]
        );
    }

    #[test]
    fn test_refetch_does_not_clobber_staged_edit() {
        let mut sync = loaded();
        sync.set_soreness(day(), MuscleGroup::Back, 6, Instant::now())
            .unwrap();
        let mut server = Snapshot::new();
        server.insert("back", FieldValue::Level(1));
        sync.load(key(EntityKind::Soreness), server);
        assert_eq!(sync.soreness(day()).get(MuscleGroup::Back), 6);
    }

    fn protocol(foods: &[&str]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for food in foods {
            snapshot.insert(*food, FieldValue::Flag(false));
        }
        snapshot
    }

    #[test]
    fn test_refetch_without_food_drops_its_edit() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        sync.load(key(EntityKind::Checklist), protocol(&["Eggs", "Oats"]));
        let t0 = Instant::now();
        sync.set_food(day(), "Eggs", true, t0).unwrap();

        sync.load(key(EntityKind::Checklist), protocol(&["Oats"]));

        let items = sync.checklist(day()).items;
        assert_eq!(items.keys().collect::<Vec<_>>(), ["Oats"]);
        assert_eq!(completion_percentage(&items), 0);
        assert!(sync.poll_writes(after_debounce(t0)).is_empty());
        assert!(sync.is_idle());

        let reversions = sync.take_reversions();
        assert_eq!(reversions.len(), 1);
        assert_eq!(reversions[0].field.field, "Eggs");
        assert_eq!(reversions[0].restored, None);
    }

    #[test]
    fn test_late_confirmation_for_dropped_food_adds_no_key() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        sync.load(key(EntityKind::Checklist), protocol(&["Eggs", "Oats"]));
        let t0 = Instant::now();
        sync.set_food(day(), "Eggs", true, t0).unwrap();
        let req = sync.poll_writes(after_debounce(t0)).remove(0);

        sync.load(key(EntityKind::Checklist), protocol(&["Oats"]));
        let event = sync.complete_write(&req, ack(&req), after_debounce(t0));

        assert!(matches!(event, WriteEvent::Ignored(_)));
        let items = sync.checklist(day()).items;
        assert_eq!(items.keys().collect::<Vec<_>>(), ["Oats"]);
    }

    #[test]
    fn test_confirmed_write_before_load_leaves_entity_unloaded() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        sync.load(key(EntityKind::Checklist), protocol(&["Eggs"]));
        sync.load(key(EntityKind::Soreness), Snapshot::new());
        let t0 = Instant::now();
        sync.set_rpe(day(), 7, t0).unwrap();
        let req = sync.poll_writes(after_debounce(t0)).remove(0);
        let event = sync.complete_write(&req, ack(&req), after_debounce(t0));

        assert!(matches!(event, WriteEvent::Confirmed(_)));
        assert!(!sync.is_day_loaded(day()));
    }

    #[test]
    fn test_weekly_trend_reads_aggregates_and_local_today() {
        let mut sync = loaded();
        let yesterday = day().pred();
        sync.store_aggregate(
            Aggregate::Dashboard,
            DerivedHistory {
                days: vec![crate::models::DailyAdherence {
                    date: yesterday,
                    nutrition_adherence: 100.0,
                    workout_completion: 100.0,
                    competition_score: 0.0,
                }],
            },
        );

        let trend = sync.weekly_trend(day());
        assert_eq!(trend.days.len(), 2);
        assert_eq!(trend.days[0].date, day());
        // Eggs of two foods, no exercise done
        assert!((trend.days[0].combined_adherence - 25.0).abs() < 1e-9);
        assert_eq!(trend.days[1].date, yesterday);
        assert!((trend.days[1].combined_adherence - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_server_snapshot_still_has_six_groups() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        let mut server = Snapshot::new();
        server.insert("chest", FieldValue::Level(7));
        server.insert("back", FieldValue::Level(6));
        sync.load(key(EntityKind::Soreness), server);

        let view = sync.view(key(EntityKind::Soreness));
        assert_eq!(view.len(), 6);
        assert_eq!(coverage_percentage(&sync.soreness(day())), 33);
    }
}
