//! Per-entity field rules: which fields exist, their value ranges, structural
//! defaults, and which cached aggregates a write to the entity makes stale.
//!
//! Every tracked entity goes through the same cache, buffer, reconciler and
//! scheduler; only the schema differs.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::{EntityKind, FieldValue, MuscleGroup, Snapshot};

pub const EXERCISE_PREFIX: &str = "exercise:";
pub const PREDICTION_PREFIX: &str = "predicted:";
pub const RPE_FIELD: &str = "rpe";

/// Cached aggregate queries that depend on tracked entities: the 30-day
/// compliance history behind streaks, the weekly soreness history behind the
/// competition trend, and the weekly dashboard history behind the adherence
/// trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    ComplianceStats,
    SorenessSummary,
    Dashboard,
}

impl Aggregate {
    pub const ALL: [Aggregate; 3] = [
        Self::ComplianceStats,
        Self::SorenessSummary,
        Self::Dashboard,
    ];

    /// How many days of history the aggregate is computed over.
    #[must_use]
    pub fn range_days(self) -> u32 {
        match self {
            Self::ComplianceStats => 30,
            Self::SorenessSummary | Self::Dashboard => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Flag,
    Level { min: u8, max: u8, default: Option<u8> },
}

#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    /// Aggregates to invalidate after a confirmed write.
    pub invalidates: &'static [Aggregate],
}

static CHECKLIST: EntitySchema = EntitySchema {
    kind: EntityKind::Checklist,
    invalidates: &[Aggregate::ComplianceStats, Aggregate::Dashboard],
};

static SORENESS: EntitySchema = EntitySchema {
    kind: EntityKind::Soreness,
    invalidates: &[Aggregate::SorenessSummary],
};

static WORKOUT: EntitySchema = EntitySchema {
    kind: EntityKind::Workout,
    invalidates: &[Aggregate::ComplianceStats, Aggregate::Dashboard],
};

/// Field names use the lowercase group name exactly.
fn canonical_group(name: &str) -> Option<MuscleGroup> {
    MuscleGroup::ALL.into_iter().find(|g| g.as_str() == name)
}

#[must_use]
pub fn exercise_field(name: &str) -> String {
    format!("{EXERCISE_PREFIX}{name}")
}

#[must_use]
pub fn prediction_field(group: MuscleGroup) -> String {
    format!("{PREDICTION_PREFIX}{group}")
}

impl EntitySchema {
    #[must_use]
    pub fn for_kind(kind: EntityKind) -> &'static EntitySchema {
        match kind {
            EntityKind::Checklist => &CHECKLIST,
            EntityKind::Soreness => &SORENESS,
            EntityKind::Workout => &WORKOUT,
        }
    }

    /// Fields that must be present in every rendered snapshot regardless of
    /// what the store returned.
    #[must_use]
    pub fn fixed_fields(&self) -> &'static [MuscleGroup] {
        match self.kind {
            EntityKind::Soreness => &MuscleGroup::ALL,
            EntityKind::Checklist | EntityKind::Workout => &[],
        }
    }

    /// Shape of a field, or `None` when the name can never belong to this entity.
    #[must_use]
    pub fn shape(&self, field: &str) -> Option<FieldShape> {
        match self.kind {
            EntityKind::Checklist => (!field.trim().is_empty()).then_some(FieldShape::Flag),
            EntityKind::Soreness => canonical_group(field).map(|_| FieldShape::Level {
                min: 0,
                max: 10,
                default: Some(0),
            }),
            EntityKind::Workout => {
                if field == RPE_FIELD {
                    Some(FieldShape::Level {
                        min: 1,
                        max: 10,
                        default: None,
                    })
                } else if let Some(name) = field.strip_prefix(EXERCISE_PREFIX) {
                    (!name.trim().is_empty()).then_some(FieldShape::Flag)
                } else if let Some(group) = field.strip_prefix(PREDICTION_PREFIX) {
                    canonical_group(group).map(|_| FieldShape::Level {
                        min: 0,
                        max: 10,
                        default: None,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Whether the field's key set is owned by the day's generated plan
    /// (protocol foods, planned exercises) rather than by the schema.
    #[must_use]
    pub fn is_plan_field(&self, field: &str) -> bool {
        match self.kind {
            EntityKind::Checklist => true,
            EntityKind::Workout => field.starts_with(EXERCISE_PREFIX),
            EntityKind::Soreness => false,
        }
    }

    #[must_use]
    pub fn default_value(&self, field: &str) -> Option<FieldValue> {
        match self.shape(field)? {
            FieldShape::Flag => Some(FieldValue::Flag(false)),
            FieldShape::Level { default, .. } => default.map(FieldValue::Level),
        }
    }

    /// Bring an out-of-range level into range. Flags pass through.
    #[must_use]
    pub fn clamp(&self, field: &str, value: FieldValue) -> FieldValue {
        match (self.shape(field), value) {
            (Some(FieldShape::Level { min, max, .. }), FieldValue::Level(l)) => {
                FieldValue::Level(l.clamp(min, max))
            }
            _ => value,
        }
    }

    /// Strict validation, as the store applies it. `known` is the store's
    /// current snapshot, used to reject plan fields that do not exist.
    pub fn validate(
        &self,
        field: &str,
        value: FieldValue,
        known: Option<&Snapshot>,
    ) -> Result<FieldValue, SyncError> {
        let shape = self.shape(field).ok_or_else(|| self.unknown(field))?;

        if self.is_plan_field(field) && !known.is_some_and(|s| s.contains(field)) {
            return Err(self.unknown(field));
        }

        match (shape, value) {
            (FieldShape::Flag, FieldValue::Flag(_)) => Ok(value),
            (FieldShape::Level { min, max, .. }, FieldValue::Level(l)) => {
                if l < min || l > max {
                    Err(SyncError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("{l} is outside {min}-{max}"),
                    })
                } else {
                    Ok(value)
                }
            }
            (FieldShape::Flag, FieldValue::Level(_)) => Err(SyncError::InvalidValue {
                field: field.to_string(),
                reason: "expected true or false".to_string(),
            }),
            (FieldShape::Level { .. }, FieldValue::Flag(_)) => Err(SyncError::InvalidValue {
                field: field.to_string(),
                reason: "expected a number".to_string(),
            }),
        }
    }

    /// Repair a snapshot received from the store: drop fields the schema does
    /// not know, clamp levels, and fill missing fixed fields with defaults.
    #[must_use]
    pub fn normalize(&self, mut snapshot: Snapshot) -> Snapshot {
        snapshot.retain(|field, value| {
            matches!(
                (self.shape(field), value),
                (Some(FieldShape::Flag), FieldValue::Flag(_))
                    | (Some(FieldShape::Level { .. }), FieldValue::Level(_))
            )
        });
        let clamped: Vec<(String, FieldValue)> = snapshot
            .iter()
            .map(|(field, value)| (field.to_string(), self.clamp(field, value)))
            .collect();
        for (field, value) in clamped {
            snapshot.insert(field, value);
        }
        for group in self.fixed_fields() {
            if !snapshot.contains(group.as_str()) {
                if let Some(default) = self.default_value(group.as_str()) {
                    snapshot.insert(group.as_str(), default);
                }
            }
        }
        snapshot
    }

    fn unknown(&self, field: &str) -> SyncError {
        SyncError::UnknownField {
            kind: self.kind,
            field: field.to_string(),
        }
    }
}
