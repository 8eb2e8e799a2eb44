use thiserror::Error;

use crate::models::EntityKind;

/// Reasons an edit is refused before it is ever staged or written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("'{field}' is not a field of the {kind} for this day")]
    UnknownField { kind: EntityKind, field: String },
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("{kind} for {day} has not been loaded yet")]
    NotLoaded { kind: EntityKind, day: String },
}

/// Outcome classification of a failed single-field write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteFailure {
    /// Network error, timeout, or 5xx. Eligible for retry.
    #[error("transient write failure: {0}")]
    Transient(String),
    /// 4xx. The store will never accept this value.
    #[error("write rejected ({status}): {message}")]
    Permanent { status: u16, message: String },
}

impl WriteFailure {
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            Self::Permanent { status, message }
        } else {
            Self::Transient(format!("status {status}: {message}"))
        }
    }

    /// A store-side validation refusal: 404 for fields the day does not
    /// have, 400 for bad values.
    #[must_use]
    pub fn rejected(error: &SyncError) -> Self {
        let status = match error {
            SyncError::UnknownField { .. } | SyncError::NotLoaded { .. } => 404,
            SyncError::InvalidValue { .. } => 400,
        };
        Self::Permanent {
            status,
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
