use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;

use rollin_core::metrics::DayDashboard;
use rollin_core::models::{DayKey, EntityKey, EntityKind, FieldValue, MuscleGroup, SorenessLevel};
use rollin_core::remote::RemoteStore;
use rollin_core::scheduler::SyncConfig;
use rollin_core::schema::{RPE_FIELD, exercise_field, prediction_field};
use rollin_core::sync::{Reversion, Synchronizer};

use super::helpers::report_reversions;
use super::open_day;

/// One user edit from the command line.
pub(crate) enum Edit {
    Food { name: String, consumed: bool },
    Soreness { group: MuscleGroup, intensity: u8 },
    Exercise { name: String, done: bool },
    Rpe(u8),
    Prediction { group: MuscleGroup, intensity: u8 },
}

impl Edit {
    fn kind(&self) -> EntityKind {
        match self {
            Self::Food { .. } => EntityKind::Checklist,
            Self::Soreness { .. } => EntityKind::Soreness,
            Self::Exercise { .. } | Self::Rpe(_) | Self::Prediction { .. } => EntityKind::Workout,
        }
    }

    fn field(&self) -> String {
        match self {
            Self::Food { name, .. } => name.clone(),
            Self::Soreness { group, .. } => group.as_str().to_string(),
            Self::Exercise { name, .. } => exercise_field(name),
            Self::Rpe(_) => RPE_FIELD.to_string(),
            Self::Prediction { group, .. } => prediction_field(*group),
        }
    }

    fn stage(&self, sync: &mut Synchronizer, day: DayKey, now: std::time::Instant) -> Result<()> {
        match self {
            Self::Food { name, consumed } => sync.set_food(day, name, *consumed, now)?,
            Self::Soreness { group, intensity } => {
                sync.set_soreness(day, *group, *intensity, now)?
            }
            Self::Exercise { name, done } => sync.set_exercise(day, name, *done, now)?,
            Self::Rpe(rpe) => sync.set_rpe(day, *rpe, now)?,
            Self::Prediction { group, intensity } => {
                sync.set_prediction(day, *group, *intensity, now)?
            }
        };
        Ok(())
    }

    fn describe(&self, dashboard: &DayDashboard) -> String {
        match self {
            Self::Food { name, consumed } => {
                let verb = if *consumed { "Checked" } else { "Unchecked" };
                format!(
                    "{verb} {name} (protocol {}% complete)",
                    dashboard.checklist_completion
                )
            }
            Self::Soreness { group, intensity } => format!(
                "{group} soreness {intensity}/10 ({})",
                SorenessLevel::from_intensity(*intensity).label()
            ),
            Self::Exercise { name, done } => {
                let verb = if *done { "Done" } else { "Not done" };
                format!(
                    "{verb}: {name} (workout {}% complete)",
                    dashboard.workout_completion
                )
            }
            Self::Rpe(rpe) => format!("Logged RPE {rpe}/10"),
            Self::Prediction { group, intensity } => {
                format!("Predicted {group} soreness {intensity}/10")
            }
        }
    }
}

#[derive(Serialize)]
struct EditOutput {
    date: DayKey,
    entity: EntityKind,
    field: String,
    value: Option<FieldValue>,
    saved: bool,
    reversions: Vec<Reversion>,
    dashboard: DayDashboard,
}

/// Stage one edit, wait for it to be written, and report the outcome.
pub(crate) async fn cmd_edit<S: RemoteStore>(
    store: Arc<S>,
    config: SyncConfig,
    day: DayKey,
    edit: Edit,
    json: bool,
) -> Result<()> {
    let mut session = open_day(store, config, day).await?;
    let now = session.now();
    edit.stage(session.sync_mut(), day, now)?;
    let reversions = session.settle().await?;

    let sync = session.sync();
    let dashboard = sync.dashboard(day);
    let field = edit.field();
    let value = sync
        .view(EntityKey::new(day, edit.kind()))
        .get(&field);
    let saved = reversions.is_empty();

    if json {
        let out = EditOutput {
            date: day,
            entity: edit.kind(),
            field,
            value,
            saved,
            reversions,
            dashboard,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        if !saved {
            bail!("Edit was not saved");
        }
        return Ok(());
    }

    if !saved {
        report_reversions(&reversions);
        bail!("Edit was not saved");
    }
    println!("{} for {day}", edit.describe(&dashboard));
    Ok(())
}
