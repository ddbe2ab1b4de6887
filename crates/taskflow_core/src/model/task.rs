//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record and its creation draft.
//! - Validate cross-field invariants before persistence.
//!
//! # Invariants
//! - `status` is derived from `progress` unless it is `postponed`, `cancelled`
//!   or `pending`, all of which require `progress == 0`.
//! - `is_follow_up_task == true` implies `parent_task_id.is_some()`.
//! - `created_at`/`updated_at` are owned by the repository.

use crate::model::field::{FieldMap, FieldValue, TaskField};
use crate::model::recurrence::RecurrenceRule;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Server-assigned task identifier.
pub type TaskId = i64;

/// Upper bound for `progress`.
pub const MAX_PROGRESS: u8 = 100;

/// Task lifecycle state.
///
/// The first five values are the work states shown on status boards.
/// `Pending` is only ever seeded on generated confirmation tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started (`progress == 0`).
    Scheduled,
    /// Partially done (`0 < progress < 100`).
    InProgress,
    /// Done (`progress == 100`).
    Completed,
    /// Paused by explicit choice.
    Postponed,
    /// Abandoned by explicit choice.
    Cancelled,
    /// Awaiting the delegate's acknowledgment.
    Pending,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Scheduled,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Postponed,
        TaskStatus::Cancelled,
        TaskStatus::Pending,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Postponed => "postponed",
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "scheduled" => Some(Self::Scheduled),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "postponed" => Some(Self::Postponed),
            "cancelled" => Some(Self::Cancelled),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    /// Whether this status is fully determined by `progress`.
    pub fn is_progress_derived(self) -> bool {
        matches!(self, Self::Scheduled | Self::InProgress | Self::Completed)
    }

    /// Whether this status pins `progress` to zero.
    pub fn forces_zero_progress(self) -> bool {
        matches!(self, Self::Postponed | Self::Cancelled | Self::Pending)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task urgency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

impl Display for TaskPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical persisted task record.
///
/// Serialized with camelCase keys to match the HTTP wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub priority: TaskPriority,
    /// Responsible party. Many tasks may share one assignee.
    pub assigned_to: String,
    /// Originator; follow-up tasks inherit it from their parent.
    pub created_by: String,
    /// Delegate; presence triggers the follow-up confirmation check.
    pub follow_up_assignee: Option<String>,
    /// Free-text memo from the delegator, folded into the confirmation body.
    pub follow_up_memo: Option<String>,
    /// Audit marker on generated confirmation tasks.
    pub follow_up_type: Option<String>,
    pub is_follow_up_task: bool,
    /// Weak back-reference to the spawning task. Never mutated.
    pub parent_task_id: Option<TaskId>,
    pub work_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    /// Rule owned by a recurring template task.
    pub recurrence: Option<RecurrenceRule>,
    /// Template back-reference for materialized recurring instances.
    pub recurring_parent_id: Option<TaskId>,
    /// 1-based ordinal inside a recurring series.
    pub recurring_sequence: Option<u32>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

/// Creation draft for a task that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub priority: TaskPriority,
    pub assigned_to: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub follow_up_assignee: Option<String>,
    #[serde(default)]
    pub follow_up_memo: Option<String>,
    #[serde(default)]
    pub follow_up_type: Option<String>,
    #[serde(default)]
    pub is_follow_up_task: bool,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    #[serde(default)]
    pub work_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub recurring_parent_id: Option<TaskId>,
    #[serde(default)]
    pub recurring_sequence: Option<u32>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Scheduled
}

impl NewTask {
    /// Creates a `scheduled` draft with zero progress and medium priority.
    pub fn new(
        title: impl Into<String>,
        assigned_to: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: None,
            status: TaskStatus::Scheduled,
            progress: 0,
            priority: TaskPriority::Medium,
            assigned_to: assigned_to.into(),
            created_by: created_by.into(),
            follow_up_assignee: None,
            follow_up_memo: None,
            follow_up_type: None,
            is_follow_up_task: false,
            parent_task_id: None,
            work_date: None,
            due_date: None,
            recurrence: None,
            recurring_parent_id: None,
            recurring_sequence: None,
        }
    }

    /// Copies the content fields of an existing task into a new draft.
    ///
    /// Identity, timestamps, recurrence bookkeeping and follow-up linkage are
    /// not carried over.
    pub fn from_template(template: &Task) -> Self {
        Self {
            title: template.title.clone(),
            description: template.description.clone(),
            category: template.category.clone(),
            status: template.status,
            progress: template.progress,
            priority: template.priority,
            assigned_to: template.assigned_to.clone(),
            created_by: template.created_by.clone(),
            follow_up_assignee: template.follow_up_assignee.clone(),
            follow_up_memo: template.follow_up_memo.clone(),
            follow_up_type: None,
            is_follow_up_task: false,
            parent_task_id: None,
            work_date: template.work_date,
            due_date: template.due_date,
            recurrence: None,
            recurring_parent_id: None,
            recurring_sequence: None,
        }
    }

    pub fn validate(&self) -> Result<(), TaskValidationError> {
        validate_invariants(&InvariantView {
            title: &self.title,
            assigned_to: &self.assigned_to,
            status: self.status,
            progress: self.progress,
            is_follow_up_task: self.is_follow_up_task,
            parent_task_id: self.parent_task_id,
            work_date: self.work_date,
            due_date: self.due_date,
        })
    }
}

impl Task {
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        validate_invariants(&InvariantView {
            title: &self.title,
            assigned_to: &self.assigned_to,
            status: self.status,
            progress: self.progress,
            is_follow_up_task: self.is_follow_up_task,
            parent_task_id: self.parent_task_id,
            work_date: self.work_date,
            due_date: self.due_date,
        })
    }

    /// Returns whether this task should trigger a follow-up confirmation.
    ///
    /// Delegating to oneself is a no-op.
    pub fn requests_follow_up(&self) -> bool {
        match self.follow_up_assignee.as_deref().map(str::trim) {
            Some(assignee) if !assignee.is_empty() => assignee != self.assigned_to.trim(),
            _ => false,
        }
    }

    /// Applies a field patch in memory.
    ///
    /// Values are expected to be pre-checked with `TaskField::check`; a value
    /// of the wrong shape for its field is reported as `FieldShape`.
    pub fn apply_fields(&mut self, fields: &FieldMap) -> Result<(), TaskValidationError> {
        for (field, value) in fields.iter() {
            self.apply_field(*field, value)?;
        }
        Ok(())
    }

    fn apply_field(&mut self, field: TaskField, value: &FieldValue) -> Result<(), TaskValidationError> {
        let shape_error = || TaskValidationError::FieldShape(field);
        match field {
            TaskField::Title => self.title = value.as_text().ok_or_else(shape_error)?.to_string(),
            TaskField::Description => {
                self.description = value.as_optional_text().ok_or_else(shape_error)?.unwrap_or_default()
            }
            TaskField::Category => self.category = value.as_optional_text().ok_or_else(shape_error)?,
            TaskField::Status => self.status = value.as_status().ok_or_else(shape_error)?,
            TaskField::Progress => self.progress = value.as_progress().ok_or_else(shape_error)?,
            TaskField::Priority => self.priority = value.as_priority().ok_or_else(shape_error)?,
            TaskField::AssignedTo => {
                self.assigned_to = value.as_text().ok_or_else(shape_error)?.to_string()
            }
            TaskField::FollowUpAssignee => {
                self.follow_up_assignee = value.as_optional_text().ok_or_else(shape_error)?
            }
            TaskField::FollowUpMemo => {
                self.follow_up_memo = value.as_optional_text().ok_or_else(shape_error)?
            }
            TaskField::WorkDate => self.work_date = value.as_optional_date().ok_or_else(shape_error)?,
            TaskField::DueDate => self.due_date = value.as_optional_date().ok_or_else(shape_error)?,
        }
        Ok(())
    }
}

/// Invariant violations detected on a task or draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    BlankTitle,
    BlankAssignee,
    ProgressOutOfRange(i64),
    /// A progress-derived status disagrees with `progress`.
    StatusProgressMismatch { status: TaskStatus, progress: u8 },
    /// A paused/terminal status carries non-zero progress.
    NonZeroProgress { status: TaskStatus, progress: u8 },
    FollowUpWithoutParent,
    PendingOnRegularTask,
    DueBeforeWork { work_date: NaiveDate, due_date: NaiveDate },
    /// Patch value shape does not fit the target field.
    FieldShape(TaskField),
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "title must not be blank"),
            Self::BlankAssignee => write!(f, "assignee must not be blank"),
            Self::ProgressOutOfRange(value) => {
                write!(f, "progress must be within 0..=100, got {value}")
            }
            Self::StatusProgressMismatch { status, progress } => write!(
                f,
                "status `{status}` does not match progress {progress}"
            ),
            Self::NonZeroProgress { status, progress } => write!(
                f,
                "status `{status}` requires progress 0, got {progress}"
            ),
            Self::FollowUpWithoutParent => write!(f, "follow-up task requires parent_task_id"),
            Self::PendingOnRegularTask => {
                write!(f, "status `pending` is reserved for follow-up tasks")
            }
            Self::DueBeforeWork { work_date, due_date } => write!(
                f,
                "due_date {due_date} is earlier than work_date {work_date}"
            ),
            Self::FieldShape(field) => {
                write!(f, "value shape does not fit field `{}`", field.wire_name())
            }
        }
    }
}

impl Error for TaskValidationError {}

struct InvariantView<'a> {
    title: &'a str,
    assigned_to: &'a str,
    status: TaskStatus,
    progress: u8,
    is_follow_up_task: bool,
    parent_task_id: Option<TaskId>,
    work_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
}

fn validate_invariants(view: &InvariantView<'_>) -> Result<(), TaskValidationError> {
    if view.title.trim().is_empty() {
        return Err(TaskValidationError::BlankTitle);
    }
    if view.assigned_to.trim().is_empty() {
        return Err(TaskValidationError::BlankAssignee);
    }
    if view.progress > MAX_PROGRESS {
        return Err(TaskValidationError::ProgressOutOfRange(i64::from(view.progress)));
    }
    if view.status.is_progress_derived()
        && crate::lifecycle::status::derive_status(view.progress) != view.status
    {
        return Err(TaskValidationError::StatusProgressMismatch {
            status: view.status,
            progress: view.progress,
        });
    }
    if view.status.forces_zero_progress() && view.progress != 0 {
        return Err(TaskValidationError::NonZeroProgress {
            status: view.status,
            progress: view.progress,
        });
    }
    if view.is_follow_up_task && view.parent_task_id.is_none() {
        return Err(TaskValidationError::FollowUpWithoutParent);
    }
    if view.status == TaskStatus::Pending && !view.is_follow_up_task {
        return Err(TaskValidationError::PendingOnRegularTask);
    }
    if let (Some(work_date), Some(due_date)) = (view.work_date, view.due_date) {
        if due_date < work_date {
            return Err(TaskValidationError::DueBeforeWork {
                work_date,
                due_date,
            });
        }
    }
    Ok(())
}
