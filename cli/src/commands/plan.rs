use anyhow::{Result, bail};
use serde::Serialize;

use rollin_core::models::DayKey;
use rollin_core::remote::PlanStore;

#[derive(Serialize)]
struct PlanOutput<'a> {
    date: DayKey,
    items: &'a [String],
}

fn print_plan(label: &str, day: DayKey, items: &[String], json: bool) -> Result<()> {
    if json {
        let out = PlanOutput { date: day, items };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!("{label} for {day}:");
    for (i, item) in items.iter().enumerate() {
        println!("  {}. {item}", i + 1);
    }
    Ok(())
}

fn clean(items: Vec<String>) -> Result<Vec<String>> {
    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        bail!("Give at least one item");
    }
    Ok(items)
}

pub(crate) async fn cmd_protocol_set<S: PlanStore>(
    store: &S,
    day: DayKey,
    foods: Vec<String>,
    json: bool,
) -> Result<()> {
    let foods = clean(foods)?;
    store.record_protocol(day, foods.clone()).await?;
    print_plan("Protocol", day, &foods, json)
}

pub(crate) async fn cmd_workout_plan<S: PlanStore>(
    store: &S,
    day: DayKey,
    exercises: Vec<String>,
    json: bool,
) -> Result<()> {
    let exercises = clean(exercises)?;
    store.record_workout_plan(day, exercises.clone()).await?;
    print_plan("Workout plan", day, &exercises, json)
}
