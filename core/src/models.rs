use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Calendar day a set of observations belongs to (local timezone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    #[must_use]
    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    #[must_use]
    pub fn date(self) -> NaiveDate {
        self.0
    }

    #[must_use]
    pub fn pred(self) -> Self {
        Self(self.0 - chrono::Duration::days(1))
    }
}

impl FromStr for DayKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(s, DATE_FORMAT)
            .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD"))?;
        Ok(Self(date))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Checklist,
    Soreness,
    Workout,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Checklist, Self::Soreness, Self::Workout];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checklist => "checklist",
            Self::Soreness => "soreness",
            Self::Workout => "workout",
        }
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "checklist" => Ok(Self::Checklist),
            "soreness" => Ok(Self::Soreness),
            "workout" => Ok(Self::Workout),
            _ => bail!("Unknown entity '{s}'. Use checklist, soreness, or workout"),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuscleGroup {
    Chest,
    Back,
    Shoulders,
    Legs,
    Core,
    Arms,
}

impl MuscleGroup {
    pub const ALL: [MuscleGroup; 6] = [
        Self::Chest,
        Self::Back,
        Self::Shoulders,
        Self::Legs,
        Self::Core,
        Self::Arms,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chest => "chest",
            Self::Back => "back",
            Self::Shoulders => "shoulders",
            Self::Legs => "legs",
            Self::Core => "core",
            Self::Arms => "arms",
        }
    }

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for MuscleGroup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        MuscleGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == lower)
            .with_context(|| {
                format!("Invalid muscle group '{s}'. Use chest, back, shoulders, legs, core, arms")
            })
    }
}

impl fmt::Display for MuscleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one tracked entity of one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub day: DayKey,
    pub kind: EntityKind,
}

impl EntityKey {
    #[must_use]
    pub fn new(day: DayKey, kind: EntityKind) -> Self {
        Self { day, kind }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.day, self.kind)
    }
}

/// Identifies one independently synchronized field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub entity: EntityKey,
    pub field: String,
}

impl FieldKey {
    pub fn new(entity: EntityKey, field: impl Into<String>) -> Self {
        Self {
            entity,
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Level(u8),
}

impl FieldValue {
    #[must_use]
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(b),
            Self::Level(_) => None,
        }
    }

    #[must_use]
    pub fn as_level(self) -> Option<u8> {
        match self {
            Self::Level(l) => Some(l),
            Self::Flag(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Level(l) => write!(f, "{l}"),
        }
    }
}

/// Field-by-field state of one entity, as confirmed by the store or as rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, FieldValue>);

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.0.get(field).copied()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(field.into(), value)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, FieldValue) -> bool) {
        self.0.retain(|k, v| keep(k, *v));
    }
}

impl FromIterator<(String, FieldValue)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Store acknowledgment of a single-field write. Carries the value the store kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub field: String,
    pub value: FieldValue,
}

/// One day of the store-computed adherence history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAdherence {
    pub date: DayKey,
    pub nutrition_adherence: f64,
    pub workout_completion: f64,
    pub competition_score: f64,
}

impl DailyAdherence {
    /// Mean of nutrition adherence and workout completion.
    #[must_use]
    pub fn combined(&self) -> f64 {
        (self.nutrition_adherence + self.workout_completion) / 2.0
    }
}

/// Aggregate history over a range of days, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedHistory {
    pub days: Vec<DailyAdherence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SorenessLevel {
    None,
    Mild,
    Moderate,
    VerySore,
}

impl SorenessLevel {
    #[must_use]
    pub fn from_intensity(intensity: u8) -> Self {
        match intensity {
            0 => Self::None,
            1..=4 => Self::Mild,
            5..=8 => Self::Moderate,
            _ => Self::VerySore,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "No soreness",
            Self::Mild => "Mild",
            Self::Moderate => "Moderate",
            Self::VerySore => "Very sore",
        }
    }
}
