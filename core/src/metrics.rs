//! Derived metrics. Every function here is pure: the same input always gives
//! the same output, so callers can recompute on every edit.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{DailyAdherence, DayKey, DerivedHistory};
use crate::reconcile::{ChecklistView, SorenessView, WorkoutView};

/// Intensity at which a muscle group counts as actively sore.
pub const SORE_THRESHOLD: u8 = 5;
/// Fewer sore groups than this is a coverage gap.
pub const MIN_SORE_GROUPS: usize = 2;
/// Adherence needed for a day to extend a streak.
pub const STREAK_THRESHOLD: f64 = 80.0;

const GROUP_COUNT: f64 = 6.0;

#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (100.0 * part as f64 / whole as f64).round() as u32
}

/// Share of checked items, rounded. Zero for an empty checklist.
#[must_use]
pub fn completion_percentage(items: &BTreeMap<String, bool>) -> u32 {
    percent(items.values().filter(|done| **done).count(), items.len())
}

#[must_use]
pub fn sore_group_count(soreness: &SorenessView) -> usize {
    soreness
        .iter()
        .filter(|(_, level)| *level >= SORE_THRESHOLD)
        .count()
}

#[must_use]
pub fn coverage_percentage(soreness: &SorenessView) -> u32 {
    percent(sore_group_count(soreness), 6)
}

#[must_use]
pub fn has_coverage_gap(soreness: &SorenessView) -> bool {
    sore_group_count(soreness) < MIN_SORE_GROUPS
}

/// The only two determinants of the competition score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompetitionInputs {
    pub sore_groups: usize,
    /// Mean intensity of the sore groups; zero when none are sore.
    pub mean_intensity: f64,
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn competition_inputs(soreness: &SorenessView) -> CompetitionInputs {
    let sore: Vec<u8> = soreness
        .iter()
        .map(|(_, level)| level)
        .filter(|level| *level >= SORE_THRESHOLD)
        .collect();
    let mean_intensity = if sore.is_empty() {
        0.0
    } else {
        sore.iter().map(|l| f64::from(*l)).sum::<f64>() / sore.len() as f64
    };
    CompetitionInputs {
        sore_groups: sore.len(),
        mean_intensity,
    }
}

/// `100 * (sore_groups / 6) * (mean_intensity / 10)`, clamped to 0..=100.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn competition_score(inputs: CompetitionInputs) -> f64 {
    let breadth = (inputs.sore_groups as f64 / GROUP_COUNT).clamp(0.0, 1.0);
    let depth = (inputs.mean_intensity / 10.0).clamp(0.0, 1.0);
    (100.0 * breadth * depth).clamp(0.0, 100.0)
}

#[must_use]
pub fn combined_adherence(nutrition: f64, workout: f64) -> f64 {
    (nutrition + workout) / 2.0
}

/// Everything the day view shows, computed from reconciled state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayDashboard {
    pub date: DayKey,
    pub checklist_completion: u32,
    pub workout_completion: u32,
    pub coverage_percentage: u32,
    pub coverage_gap: bool,
    pub sore_groups: usize,
    pub mean_sore_intensity: f64,
    pub competition_score: f64,
    pub combined_adherence: f64,
}

impl DayDashboard {
    #[must_use]
    pub fn compute(
        date: DayKey,
        checklist: &ChecklistView,
        soreness: &SorenessView,
        workout: &WorkoutView,
    ) -> Self {
        let checklist_completion = completion_percentage(&checklist.items);
        let workout_completion = completion_percentage(&workout.exercises);
        let inputs = competition_inputs(soreness);
        Self {
            date,
            checklist_completion,
            workout_completion,
            coverage_percentage: coverage_percentage(soreness),
            coverage_gap: has_coverage_gap(soreness),
            sore_groups: inputs.sore_groups,
            mean_sore_intensity: inputs.mean_intensity,
            competition_score: competition_score(inputs),
            combined_adherence: combined_adherence(
                f64::from(checklist_completion),
                f64::from(workout_completion),
            ),
        }
    }

    #[must_use]
    pub fn as_daily_adherence(&self) -> DailyAdherence {
        DailyAdherence {
            date: self.date,
            nutrition_adherence: f64::from(self.checklist_completion),
            workout_completion: f64::from(self.workout_completion),
            competition_score: self.competition_score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComplianceStats {
    pub total_days: usize,
    pub average_adherence: f64,
    pub average_combined: f64,
    pub current_streak: u32,
    pub best_streak: u32,
}

/// Adherence stats over store history, with `today` computed locally
/// replacing whatever the store had for that date.
///
/// The current streak counts back from today when today already qualifies,
/// otherwise from yesterday, so a day still in progress never breaks it.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compliance_stats(
    history: &DerivedHistory,
    today: DayKey,
    local_today: Option<&DailyAdherence>,
) -> ComplianceStats {
    let mut by_day: BTreeMap<DayKey, &DailyAdherence> =
        history.days.iter().map(|d| (d.date, d)).collect();
    if let Some(local) = local_today {
        by_day.insert(local.date, local);
    }
    by_day.retain(|day, _| *day <= today);

    if by_day.is_empty() {
        return ComplianceStats::default();
    }

    let total_days = by_day.len();
    let average_adherence = round1(
        by_day.values().map(|d| d.nutrition_adherence).sum::<f64>() / total_days as f64,
    );
    let average_combined =
        round1(by_day.values().map(|d| d.combined()).sum::<f64>() / total_days as f64);

    let qualifies = |day: DayKey| {
        by_day
            .get(&day)
            .is_some_and(|d| d.nutrition_adherence >= STREAK_THRESHOLD)
    };

    let mut cursor = if qualifies(today) { today } else { today.pred() };
    let mut current_streak = 0;
    while qualifies(cursor) {
        current_streak += 1;
        cursor = cursor.pred();
    }

    let mut best_streak = 0;
    let mut run = 0;
    let mut previous: Option<DayKey> = None;
    for (day, entry) in &by_day {
        if entry.nutrition_adherence >= STREAK_THRESHOLD {
            run = if previous.is_some_and(|p| p == day.pred()) {
                run + 1
            } else {
                1
            };
            previous = Some(*day);
        } else {
            run = 0;
            previous = None;
        }
        best_streak = best_streak.max(run);
    }

    ComplianceStats {
        total_days,
        average_adherence,
        average_combined,
        current_streak,
        best_streak,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Days covered by [`weekly_trend`], today included.
pub const TREND_DAYS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendDay {
    pub date: DayKey,
    pub combined_adherence: f64,
    pub competition_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeeklyTrend {
    /// Tracked days only, most recent first.
    pub days: Vec<TrendDay>,
    pub average_combined: f64,
    pub average_competition: f64,
}

fn row_for<'a>(
    history: &'a DerivedHistory,
    local_today: Option<&'a DailyAdherence>,
    day: DayKey,
) -> Option<&'a DailyAdherence> {
    local_today
        .filter(|local| local.date == day)
        .or_else(|| history.days.iter().find(|d| d.date == day))
}

/// Last seven days of combined adherence (from `dashboard`) and competition
/// score (from `soreness`). `local_today` replaces the store's row for its date
/// in both. A day missing from one history counts as 0 there.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn weekly_trend(
    dashboard: &DerivedHistory,
    soreness: &DerivedHistory,
    today: DayKey,
    local_today: Option<&DailyAdherence>,
) -> WeeklyTrend {
    let mut days = Vec::new();
    let mut cursor = today;
    for _ in 0..TREND_DAYS {
        let adherence = row_for(dashboard, local_today, cursor);
        let competition = row_for(soreness, local_today, cursor);
        if adherence.is_some() || competition.is_some() {
            days.push(TrendDay {
                date: cursor,
                combined_adherence: adherence.map_or(0.0, DailyAdherence::combined),
                competition_score: competition.map_or(0.0, |d| d.competition_score),
            });
        }
        cursor = cursor.pred();
    }

    if days.is_empty() {
        return WeeklyTrend::default();
    }
    let n = days.len() as f64;
    WeeklyTrend {
        average_combined: round1(days.iter().map(|d| d.combined_adherence).sum::<f64>() / n),
        average_competition: round1(days.iter().map(|d| d.competition_score).sum::<f64>() / n),
        days,
    }
}

/// Short coaching line from streak, soreness coverage, and adherence.
#[must_use]
pub fn coaching_message(streak: u32, sore_groups: usize, combined: f64, nutrition: f64) -> String {
    let mut messages: Vec<String> = Vec::new();

    if streak >= 7 {
        messages.push(format!("{streak} day streak! You're crushing it!"));
    } else if streak >= 3 {
        messages.push(format!("{streak} days strong - keep it going!"));
    }

    match sore_groups {
        0 => messages.push(
            "No muscle groups are sore. Time to train and rebuild that competition!".to_string(),
        ),
        1 => messages
            .push("Only one muscle group sore. Consider training more groups soon.".to_string()),
        2 => {}
        n => messages.push(format!(
            "Great soreness coverage ({n} groups). Maintaining that competition!"
        )),
    }

    if combined >= 90.0 {
        messages.push("Perfect adherence today!".to_string());
    } else if combined >= 70.0 {
        messages.push("Good progress today. Keep pushing forward!".to_string());
    } else if nutrition < 50.0 {
        messages.push("Let's get those protocol foods in. Every meal matters!".to_string());
    }

    if messages.is_empty() {
        messages.push("Let's make today count. One meal, one workout, one day at a time.".to_string());
    }
    messages.join(" ")
}
