use std::process;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use rollin_core::metrics::{
    ComplianceStats, DayDashboard, WeeklyTrend, coaching_message, compliance_stats,
};
use rollin_core::models::{DailyAdherence, DayKey, SorenessLevel};
use rollin_core::reconcile::{ChecklistView, SorenessView, WorkoutView};
use rollin_core::remote::RemoteStore;
use rollin_core::scheduler::SyncConfig;

use super::helpers::{bar, no_neg_zero};
use super::open_day;

#[derive(Serialize)]
struct StatusReport {
    date: DayKey,
    checklist: ChecklistView,
    soreness: SorenessView,
    workout: WorkoutView,
    dashboard: DayDashboard,
    stats: ComplianceStats,
    trend: WeeklyTrend,
    message: String,
}

#[derive(Tabled)]
struct SorenessRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Level")]
    level: u8,
    #[tabled(rename = "Severity")]
    severity: &'static str,
    #[tabled(rename = "Predicted")]
    predicted: String,
}

fn check(done: bool) -> &'static str {
    if done { "[x]" } else { "[ ]" }
}

pub(crate) async fn cmd_status<S: RemoteStore>(
    store: Arc<S>,
    config: SyncConfig,
    day: DayKey,
    json: bool,
) -> Result<()> {
    let mut session = open_day(store, config, day).await?;
    session.refresh_aggregates().await?;

    let sync = session.sync();
    let dashboard = sync.dashboard(day);
    let stats = sync.compliance_stats(DayKey::today());
    let trend = sync.weekly_trend(DayKey::today());
    let message = coaching_message(
        stats.current_streak,
        dashboard.sore_groups,
        dashboard.combined_adherence,
        f64::from(dashboard.checklist_completion),
    );
    let report = StatusReport {
        date: day,
        checklist: sync.checklist(day),
        soreness: sync.soreness(day),
        workout: sync.workout(day),
        dashboard,
        stats,
        trend,
        message,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_status(&report);
    Ok(())
}

fn print_status(report: &StatusReport) {
    let d = &report.dashboard;
    println!("=== {} ===\n", report.date);

    let eaten = report.checklist.items.values().filter(|v| **v).count();
    println!(
        "  PROTOCOL  {} {}% ({eaten}/{})",
        bar(f64::from(d.checklist_completion), 20),
        d.checklist_completion,
        report.checklist.items.len()
    );
    if report.checklist.items.is_empty() {
        println!("    (no protocol set, use `rollin protocol set`)");
    }
    for (food, done) in &report.checklist.items {
        println!("    {} {food}", check(*done));
    }
    println!();

    let done = report.workout.exercises.values().filter(|v| **v).count();
    let rpe = report
        .workout
        .rpe
        .map(|r| format!("  RPE {r}/10"))
        .unwrap_or_default();
    println!(
        "  WORKOUT   {} {}% ({done}/{}){rpe}",
        bar(f64::from(d.workout_completion), 20),
        d.workout_completion,
        report.workout.exercises.len()
    );
    for (exercise, done) in &report.workout.exercises {
        println!("    {} {exercise}", check(*done));
    }
    println!();

    println!(
        "  SORENESS  {} sore groups, coverage {}%",
        d.sore_groups, d.coverage_percentage
    );
    let rows: Vec<SorenessRow> = report
        .soreness
        .iter()
        .map(|(group, level)| SorenessRow {
            group: group.to_string(),
            level,
            severity: SorenessLevel::from_intensity(level).label(),
            predicted: report
                .workout
                .predicted
                .get(&group)
                .map(ToString::to_string)
                .unwrap_or_default(),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    if d.coverage_gap {
        println!("  Warning: fewer than 2 muscle groups are sore. Competition is slipping.");
    }
    println!();

    let s = &report.stats;
    println!(
        "  COMPETITION {:.1}  |  COMBINED {:.1}%",
        no_neg_zero(d.competition_score),
        no_neg_zero(d.combined_adherence)
    );
    println!(
        "  STREAK {} days (best {})  |  {}-day avg {:.1}%",
        s.current_streak, s.best_streak, s.total_days, s.average_adherence
    );
    print_trend(&report.trend);
    println!("\n  {}", report.message);
}

fn print_trend(trend: &WeeklyTrend) {
    if trend.days.is_empty() {
        return;
    }
    println!(
        "  WEEK  combined avg {:.1}%  |  competition avg {:.1}",
        no_neg_zero(trend.average_combined),
        no_neg_zero(trend.average_competition)
    );
    for day in &trend.days {
        println!(
            "    {}  {} {:>5.1}%  competition {:>5.1}",
            day.date,
            bar(day.combined_adherence, 10),
            no_neg_zero(day.combined_adherence),
            no_neg_zero(day.competition_score)
        );
    }
}

#[derive(Serialize)]
struct HistoryReport {
    days: Vec<DailyAdherence>,
    stats: ComplianceStats,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Nutrition")]
    nutrition: String,
    #[tabled(rename = "Workout")]
    workout: String,
    #[tabled(rename = "Combined")]
    combined: String,
    #[tabled(rename = "Competition")]
    competition: String,
}

pub(crate) async fn cmd_history<S: RemoteStore>(store: &S, days: u32, json: bool) -> Result<()> {
    let history = store.fetch_derived_history(days).await?;
    let stats = compliance_stats(&history, DayKey::today(), None);

    if json {
        let report = HistoryReport {
            days: history.days,
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if history.days.is_empty() {
        eprintln!("No tracked days in the last {days} days");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = history
        .days
        .iter()
        .map(|d| HistoryRow {
            date: d.date.to_string(),
            nutrition: format!("{:.0}%", d.nutrition_adherence),
            workout: format!("{:.0}%", d.workout_completion),
            combined: format!("{:.1}%", d.combined()),
            competition: format!("{:.1}", no_neg_zero(d.competition_score)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!(
        "Streak: {} days (best {})  |  Average adherence {:.1}%  |  Combined {:.1}%",
        stats.current_streak, stats.best_streak, stats.average_adherence, stats.average_combined
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollin_core::models::{EntityKey, EntityKind, FieldValue};
    use rollin_core::store::LocalStore;

    #[tokio::test]
    async fn test_status_on_untracked_day() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let day: DayKey = "2024-06-15".parse().unwrap();
        cmd_status(Arc::clone(&store), SyncConfig::default(), day, true)
            .await
            .unwrap();
        // Viewing a day never writes anything back.
        let snapshot = store
            .snapshot(EntityKey::new(day, EntityKind::Checklist))
            .unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_history_json_with_tracked_day() {
        let store = LocalStore::open_in_memory().unwrap();
        let today = DayKey::today();
        store.set_protocol(today, &["eggs".to_string()]).unwrap();
        store
            .write(
                EntityKey::new(today, EntityKind::Checklist),
                "eggs",
                FieldValue::Flag(true),
            )
            .unwrap();
        cmd_history(&store, 7, true).await.unwrap();
        let history = store.history(7, today).unwrap();
        assert_eq!(history.days.len(), 1);
        assert!((history.days[0].nutrition_adherence - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_check_marks() {
        assert_eq!(check(true), "[x]");
        assert_eq!(check(false), "[ ]");
    }
}
