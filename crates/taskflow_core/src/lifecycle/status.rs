//! Progress-to-status derivation.
//!
//! # Invariants
//! - `derive_status` is total over validated progress `0..=100`.
//! - Explicit `postponed`/`cancelled` choices always pin progress to 0.

use crate::model::task::{TaskStatus, MAX_PROGRESS};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Maps validated progress to its work status.
///
/// `0` is `scheduled`, `100` is `completed`, everything between is
/// `in_progress`. Callers reject out-of-range input before calling.
pub fn derive_status(progress: u8) -> TaskStatus {
    match progress {
        0 => TaskStatus::Scheduled,
        p if p >= MAX_PROGRESS => TaskStatus::Completed,
        _ => TaskStatus::InProgress,
    }
}

/// Validates raw progress input from a client.
pub fn validate_progress(raw: i64) -> Result<u8, StatusChoiceError> {
    u8::try_from(raw)
        .ok()
        .filter(|progress| *progress <= MAX_PROGRESS)
        .ok_or(StatusChoiceError::ProgressOutOfRange(raw))
}

/// Resulting `(status, progress)` pair of an explicit status pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChoice {
    pub status: TaskStatus,
    pub progress: u8,
}

/// Resolves a status chosen explicitly by a user.
///
/// - `postponed`, `cancelled`, `scheduled` force progress 0.
/// - `completed` forces progress 100.
/// - `in_progress` is only reachable through a progress edit.
/// - `pending` is seeded by delegation only.
pub fn apply_status_choice(status: TaskStatus) -> Result<StatusChoice, StatusChoiceError> {
    let progress = match status {
        TaskStatus::Postponed | TaskStatus::Cancelled | TaskStatus::Scheduled => 0,
        TaskStatus::Completed => MAX_PROGRESS,
        TaskStatus::InProgress | TaskStatus::Pending => {
            return Err(StatusChoiceError::NotSelectable(status))
        }
    };
    Ok(StatusChoice { status, progress })
}

/// Resolves a progress edit into its `(status, progress)` pair.
pub fn apply_progress(raw: i64) -> Result<StatusChoice, StatusChoiceError> {
    let progress = validate_progress(raw)?;
    Ok(StatusChoice {
        status: derive_status(progress),
        progress,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChoiceError {
    ProgressOutOfRange(i64),
    NotSelectable(TaskStatus),
}

impl Display for StatusChoiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProgressOutOfRange(value) => {
                write!(f, "progress must be within 0..=100, got {value}")
            }
            Self::NotSelectable(status) => {
                write!(f, "status `{status}` cannot be chosen explicitly")
            }
        }
    }
}

impl Error for StatusChoiceError {}
