use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, TimeDelta};
use rusqlite::{Connection, OptionalExtension, params};

use crate::metrics::DayDashboard;
use crate::models::{
    DailyAdherence, DayKey, DerivedHistory, EntityKey, EntityKind, FieldValue, Snapshot,
};
use crate::reconcile::{ChecklistView, SorenessView, WorkoutView};
use crate::schema::{EXERCISE_PREFIX, EntitySchema, PREDICTION_PREFIX, RPE_FIELD};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS tracked_days (
                    date TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS protocol_foods (
                    date TEXT NOT NULL REFERENCES tracked_days(date),
                    food_name TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    consumed INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (date, food_name)
                );

                CREATE TABLE IF NOT EXISTS soreness_records (
                    date TEXT NOT NULL REFERENCES tracked_days(date),
                    muscle_group TEXT NOT NULL,
                    intensity INTEGER NOT NULL CHECK (intensity BETWEEN 0 AND 10),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (date, muscle_group)
                );

                CREATE TABLE IF NOT EXISTS workout_exercises (
                    date TEXT NOT NULL REFERENCES tracked_days(date),
                    exercise_name TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (date, exercise_name)
                );

                CREATE TABLE IF NOT EXISTS workout_logs (
                    date TEXT PRIMARY KEY REFERENCES tracked_days(date),
                    rpe INTEGER CHECK (rpe BETWEEN 1 AND 10),
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS soreness_predictions (
                    date TEXT NOT NULL REFERENCES tracked_days(date),
                    muscle_group TEXT NOT NULL,
                    intensity INTEGER NOT NULL CHECK (intensity BETWEEN 0 AND 10),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (date, muscle_group)
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Days ---

    pub fn ensure_day(&self, day: DayKey) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tracked_days (date, created_at) VALUES (?1, ?2)",
            params![day.to_string(), Local::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn tracked_days(&self, from: DayKey, to: DayKey) -> Result<Vec<DayKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT date FROM tracked_days WHERE date >= ?1 AND date <= ?2 ORDER BY date DESC",
        )?;
        let dates = stmt
            .query_map(params![from.to_string(), to.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        dates
            .iter()
            .map(|d| d.parse().with_context(|| format!("Bad date in tracked_days: {d}")))
            .collect()
    }

    // --- Plans ---

    /// Replace the day's food list. Foods kept from the previous list keep
    /// their consumed state; dropped foods are removed.
    pub fn set_protocol(&self, day: DayKey, foods: &[String]) -> Result<()> {
        self.replace_plan(day, foods, "protocol_foods", "food_name")
    }

    /// Replace the day's exercise list, keeping completion for retained names.
    pub fn set_workout_plan(&self, day: DayKey, exercises: &[String]) -> Result<()> {
        self.replace_plan(day, exercises, "workout_exercises", "exercise_name")
    }

    fn replace_plan(&self, day: DayKey, names: &[String], table: &str, column: &str) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for name in names {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                bail!("Plan entries must not be empty");
            }
            if !seen.insert(trimmed) {
                bail!("Duplicate plan entry: {trimmed}");
            }
        }

        let date = day.to_string();
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        self.ensure_day(day)?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare(&format!("SELECT {column} FROM {table} WHERE date = ?1"))?;
            stmt.query_map(params![date], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        for old in existing.iter().filter(|old| !seen.contains(old.as_str())) {
            tx.execute(
                &format!("DELETE FROM {table} WHERE date = ?1 AND {column} = ?2"),
                params![date, old],
            )?;
        }
        for (position, name) in names.iter().map(|n| n.trim()).enumerate() {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (date, {column}, position, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(date, {column}) DO UPDATE SET
                        position = excluded.position,
                        updated_at = excluded.updated_at"
                ),
                params![date, name, i64::try_from(position)?, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Snapshots ---

    /// Persisted fields of one entity. Fields never recorded are absent.
    pub fn get_snapshot(&self, key: EntityKey) -> Result<Snapshot> {
        let date = key.day.to_string();
        let mut snapshot = Snapshot::new();
        match key.kind {
            EntityKind::Checklist => {
                let mut stmt = self.conn.prepare(
                    "SELECT food_name, consumed FROM protocol_foods WHERE date = ?1 ORDER BY position",
                )?;
                let rows = stmt.query_map(params![date], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
                })?;
                for row in rows {
                    let (name, consumed) = row?;
                    snapshot.insert(name, FieldValue::Flag(consumed));
                }
            }
            EntityKind::Soreness => {
                for (group, intensity) in self.group_levels("soreness_records", &date)? {
                    snapshot.insert(group, FieldValue::Level(intensity));
                }
            }
            EntityKind::Workout => {
                let mut stmt = self.conn.prepare(
                    "SELECT exercise_name, completed FROM workout_exercises WHERE date = ?1 ORDER BY position",
                )?;
                let rows = stmt.query_map(params![date], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
                })?;
                for row in rows {
                    let (name, completed) = row?;
                    snapshot.insert(format!("{EXERCISE_PREFIX}{name}"), FieldValue::Flag(completed));
                }

                let rpe: Option<Option<u8>> = self
                    .conn
                    .query_row(
                        "SELECT rpe FROM workout_logs WHERE date = ?1",
                        params![date],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(Some(rpe)) = rpe {
                    snapshot.insert(RPE_FIELD, FieldValue::Level(rpe));
                }

                for (group, intensity) in self.group_levels("soreness_predictions", &date)? {
                    snapshot.insert(
                        format!("{PREDICTION_PREFIX}{group}"),
                        FieldValue::Level(intensity),
                    );
                }
            }
        }
        Ok(snapshot)
    }

    fn group_levels(&self, table: &str, date: &str) -> Result<Vec<(String, u8)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT muscle_group, intensity FROM {table} WHERE date = ?1"
        ))?;
        let rows = stmt
            .query_map(params![date], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- Writes ---

    /// Persist one already-validated field. Plan fields must exist.
    pub fn upsert_field(&self, key: EntityKey, field: &str, value: FieldValue) -> Result<()> {
        let date = key.day.to_string();
        let now = Local::now().to_rfc3339();
        self.ensure_day(key.day)?;

        match (key.kind, value) {
            (EntityKind::Checklist, FieldValue::Flag(consumed)) => {
                let updated = self.conn.execute(
                    "UPDATE protocol_foods SET consumed = ?1, updated_at = ?2
                     WHERE date = ?3 AND food_name = ?4",
                    params![consumed, now, date, field],
                )?;
                if updated == 0 {
                    bail!("Food '{field}' is not on the protocol for {}", key.day);
                }
            }
            (EntityKind::Soreness, FieldValue::Level(intensity)) => {
                self.upsert_group_level("soreness_records", &date, field, intensity, &now)?;
            }
            (EntityKind::Workout, FieldValue::Flag(completed)) => {
                let Some(name) = field.strip_prefix(EXERCISE_PREFIX) else {
                    bail!("Not an exercise field: {field}");
                };
                let updated = self.conn.execute(
                    "UPDATE workout_exercises SET completed = ?1, updated_at = ?2
                     WHERE date = ?3 AND exercise_name = ?4",
                    params![completed, now, date, name],
                )?;
                if updated == 0 {
                    bail!("Exercise '{name}' is not in the workout plan for {}", key.day);
                }
            }
            (EntityKind::Workout, FieldValue::Level(level)) if field == RPE_FIELD => {
                self.conn.execute(
                    "INSERT INTO workout_logs (date, rpe, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(date) DO UPDATE SET rpe = excluded.rpe, updated_at = excluded.updated_at",
                    params![date, level, now],
                )?;
            }
            (EntityKind::Workout, FieldValue::Level(level)) => {
                let Some(group) = field.strip_prefix(PREDICTION_PREFIX) else {
                    bail!("Not a prediction field: {field}");
                };
                self.upsert_group_level("soreness_predictions", &date, group, level, &now)?;
            }
            (kind, value) => bail!("Cannot store {value} in {kind} field '{field}'"),
        }
        Ok(())
    }

    fn upsert_group_level(
        &self,
        table: &str,
        date: &str,
        group: &str,
        intensity: u8,
        now: &str,
    ) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {table} (date, muscle_group, intensity, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(date, muscle_group) DO UPDATE SET
                    intensity = excluded.intensity,
                    updated_at = excluded.updated_at"
            ),
            params![date, group, intensity, now],
        )?;
        Ok(())
    }

    // --- Derived ---

    /// Adherence of one day, computed the same way the client computes its dashboard.
    pub fn daily_adherence(&self, day: DayKey) -> Result<DailyAdherence> {
        let snapshot = |kind| -> Result<Snapshot> {
            let raw = self.get_snapshot(EntityKey::new(day, kind))?;
            Ok(EntitySchema::for_kind(kind).normalize(raw))
        };
        let dashboard = DayDashboard::compute(
            day,
            &ChecklistView::from(&snapshot(EntityKind::Checklist)?),
            &SorenessView::from(&snapshot(EntityKind::Soreness)?),
            &WorkoutView::from(&snapshot(EntityKind::Workout)?),
        );
        Ok(dashboard.as_daily_adherence())
    }

    /// Adherence for every tracked day in the `range_days` ending at `today`,
    /// most recent first.
    pub fn derived_history(&self, range_days: u32, today: DayKey) -> Result<DerivedHistory> {
        let span = TimeDelta::days(i64::from(range_days.max(1)) - 1);
        let from = DayKey::new(today.date() - span);
        let days = self
            .tracked_days(from, today)?
            .into_iter()
            .map(|day| self.daily_adherence(day))
            .collect::<Result<Vec<_>>>()?;
        Ok(DerivedHistory { days })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> DayKey {
        "2024-06-15".parse().unwrap()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_protocol_keeps_consumed_state_for_retained_foods() {
        let db = Database::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Checklist);
        db.set_protocol(day(), &names(&["eggs", "oats", "salmon"]))
            .unwrap();
        db.upsert_field(key, "oats", FieldValue::Flag(true)).unwrap();

        db.set_protocol(day(), &names(&["oats", "spinach"])).unwrap();
        let snapshot = db.get_snapshot(key).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("oats"), Some(FieldValue::Flag(true)));
        assert_eq!(snapshot.get("spinach"), Some(FieldValue::Flag(false)));
        assert!(!snapshot.contains("eggs"));
    }

    #[test]
    fn test_protocol_rejects_duplicates() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.set_protocol(day(), &names(&["eggs", "eggs"])).is_err());
        assert!(db.set_protocol(day(), &names(&["  "])).is_err());
    }

    #[test]
    fn test_unknown_food_write_fails() {
        let db = Database::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Checklist);
        db.set_protocol(day(), &names(&["eggs"])).unwrap();
        assert!(db.upsert_field(key, "pizza", FieldValue::Flag(true)).is_err());
    }

    #[test]
    fn test_soreness_snapshot_is_partial() {
        let db = Database::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Soreness);
        db.upsert_field(key, "legs", FieldValue::Level(7)).unwrap();
        db.upsert_field(key, "legs", FieldValue::Level(8)).unwrap();

        let snapshot = db.get_snapshot(key).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("legs"), Some(FieldValue::Level(8)));
    }

    #[test]
    fn test_workout_snapshot_fields() {
        let db = Database::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Workout);
        db.set_workout_plan(day(), &names(&["squat", "row"])).unwrap();
        db.upsert_field(key, "exercise:squat", FieldValue::Flag(true))
            .unwrap();
        db.upsert_field(key, "rpe", FieldValue::Level(8)).unwrap();
        db.upsert_field(key, "predicted:legs", FieldValue::Level(6))
            .unwrap();

        let snapshot = db.get_snapshot(key).unwrap();
        assert_eq!(snapshot.get("exercise:squat"), Some(FieldValue::Flag(true)));
        assert_eq!(snapshot.get("exercise:row"), Some(FieldValue::Flag(false)));
        assert_eq!(snapshot.get("rpe"), Some(FieldValue::Level(8)));
        assert_eq!(snapshot.get("predicted:legs"), Some(FieldValue::Level(6)));
    }

    #[test]
    fn test_mistyped_write_fails() {
        let db = Database::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Soreness);
        assert!(db.upsert_field(key, "legs", FieldValue::Flag(true)).is_err());
    }

    #[test]
    fn test_derived_history_covers_range_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        let today = day();
        let yesterday = today.pred();
        let long_ago: DayKey = "2024-05-01".parse().unwrap();

        for d in [today, yesterday, long_ago] {
            db.set_protocol(d, &names(&["eggs", "oats"])).unwrap();
        }
        let checklist = |d| EntityKey::new(d, EntityKind::Checklist);
        db.upsert_field(checklist(today), "eggs", FieldValue::Flag(true))
            .unwrap();
        db.upsert_field(checklist(yesterday), "eggs", FieldValue::Flag(true))
            .unwrap();
        db.upsert_field(checklist(yesterday), "oats", FieldValue::Flag(true))
            .unwrap();

        let history = db.derived_history(7, today).unwrap();
        assert_eq!(history.days.len(), 2);
        assert_eq!(history.days[0].date, today);
        assert_eq!(history.days[0].nutrition_adherence, 50.0);
        assert_eq!(history.days[1].nutrition_adherence, 100.0);
    }

    #[test]
    fn test_history_competition_score() {
        let db = Database::open_in_memory().unwrap();
        let key = EntityKey::new(day(), EntityKind::Soreness);
        db.upsert_field(key, "legs", FieldValue::Level(8)).unwrap();
        db.upsert_field(key, "back", FieldValue::Level(6)).unwrap();
        db.upsert_field(key, "arms", FieldValue::Level(2)).unwrap();

        let adherence = db.daily_adherence(day()).unwrap();
        // 2 of 6 groups sore, mean intensity 7
        let expected = 100.0 * (2.0 / 6.0) * (7.0 / 10.0);
        assert!((adherence.competition_score - expected).abs() < 0.1);
    }
}
