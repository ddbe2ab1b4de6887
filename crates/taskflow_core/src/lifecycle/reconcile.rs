//! Pending edit queue and batch reconciliation.
//!
//! # Responsibility
//! - Hold client-side field edits per task until they are committed.
//! - Commit every dirty task as one partial update, recording success and
//!   failure independently per task.
//!
//! # Invariants
//! - Per task: `clean -> dirty -> committing -> clean` on success, or
//!   `committing -> dirty` on failure. A failed edit is never dropped.
//! - Edits for one task merge last-write-wins per field and are committed as
//!   a single update request.
//! - `commit_all` works on a snapshot; edits queued while it runs stay queued
//!   for the next round.
//! - No cross-task atomicity: one task's failure never undoes another's
//!   success.
//! - Progress edits always carry their derived status, and explicit status
//!   choices always carry their forced progress.

use crate::lifecycle::status::{apply_progress, apply_status_choice, StatusChoice, StatusChoiceError};
use crate::model::field::{FieldError, FieldMap, FieldValue, TaskField};
use crate::model::task::{Task, TaskId, TaskStatus};
use crate::repo::task_repo::{FailureKind, TaskRepository};
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Queued, not yet persisted patch for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub task_id: TaskId,
    pub fields: FieldMap,
}

/// Per-task reconciliation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Clean,
    Dirty,
    Committing,
}

/// Rejected edit. Never reaches the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    Field(FieldError),
    Status(StatusChoiceError),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(err) => write!(f, "{err}"),
            Self::Status(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Field(err) => Some(err),
            Self::Status(err) => Some(err),
        }
    }
}

impl From<FieldError> for ReconcileError {
    fn from(value: FieldError) -> Self {
        Self::Field(value)
    }
}

impl From<StatusChoiceError> for ReconcileError {
    fn from(value: StatusChoiceError) -> Self {
        Self::Status(value)
    }
}

/// One successfully committed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTask {
    pub task: Task,
    pub fields: Vec<TaskField>,
}

/// One failed task commit. The edit stays queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    pub task_id: TaskId,
    pub fields: Vec<TaskField>,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one `commit_all` round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub committed: Vec<CommittedTask>,
    pub failures: Vec<CommitFailure>,
}

impl CommitSummary {
    pub fn succeeded_count(&self) -> usize {
        self.committed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// `true` only when the round had no failures.
    pub fn all_saved(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_task_ids(&self) -> Vec<TaskId> {
        self.failures.iter().map(|failure| failure.task_id).collect()
    }

    pub fn committed_task_ids(&self) -> Vec<TaskId> {
        self.committed.iter().map(|committed| committed.task.id).collect()
    }
}

impl Display for CommitSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded_count(),
            self.failed_count()
        )
    }
}

#[derive(Debug, Default)]
struct PendingEntry {
    fields: FieldMap,
    committing: bool,
}

/// Reconciliation session owning one client's pending edits.
///
/// Methods take `&self`; the queue is guarded internally so edits may be
/// queued while a commit round is running.
#[derive(Debug)]
pub struct ChangeReconciler {
    session_id: Uuid,
    entries: Mutex<BTreeMap<TaskId, PendingEntry>>,
}

impl Default for ChangeReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeReconciler {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Queues one field edit after normalizing it.
    ///
    /// `progress` edits also queue the derived status; `status` edits also
    /// queue the forced progress.
    pub fn queue_edit(
        &self,
        task_id: TaskId,
        field: TaskField,
        value: FieldValue,
    ) -> Result<(), ReconcileError> {
        let value = field.check(value)?;
        let mut patch = FieldMap::new();
        match field {
            TaskField::Progress => {
                let progress = value.as_progress().ok_or(FieldError::InvalidValue {
                    field,
                    expected: "integer",
                })?;
                insert_choice(&mut patch, apply_progress(i64::from(progress))?);
            }
            TaskField::Status => {
                let status = value
                    .as_status()
                    .ok_or(FieldError::InvalidValue {
                        field,
                        expected: "status name",
                    })?;
                insert_choice(&mut patch, apply_status_choice(status)?);
            }
            _ => {
                patch.insert(field, value);
            }
        }
        self.merge(task_id, patch);
        Ok(())
    }

    /// Queues several edits for one task. Either all are queued or none.
    pub fn queue_fields(&self, task_id: TaskId, fields: &FieldMap) -> Result<(), ReconcileError> {
        let patch = normalize_patch(fields)?;
        if !patch.is_empty() {
            self.merge(task_id, patch);
        }
        Ok(())
    }

    /// Queues a progress edit together with its derived status.
    pub fn queue_progress(&self, task_id: TaskId, progress: i64) -> Result<StatusChoice, ReconcileError> {
        let choice = apply_progress(progress)?;
        let mut patch = FieldMap::new();
        insert_choice(&mut patch, choice);
        self.merge(task_id, patch);
        Ok(choice)
    }

    /// Queues an explicit status choice together with its forced progress.
    pub fn queue_status(&self, task_id: TaskId, status: TaskStatus) -> Result<StatusChoice, ReconcileError> {
        let choice = apply_status_choice(status)?;
        let mut patch = FieldMap::new();
        insert_choice(&mut patch, choice);
        self.merge(task_id, patch);
        Ok(choice)
    }

    pub fn pending_edit(&self, task_id: TaskId) -> Option<PendingEdit> {
        self.lock().get(&task_id).and_then(|entry| {
            (!entry.fields.is_empty()).then(|| PendingEdit {
                task_id,
                fields: entry.fields.clone(),
            })
        })
    }

    pub fn pending_edits(&self) -> Vec<PendingEdit> {
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.fields.is_empty())
            .map(|(task_id, entry)| PendingEdit {
                task_id: *task_id,
                fields: entry.fields.clone(),
            })
            .collect()
    }

    /// Ids with queued edits, ascending.
    pub fn dirty_task_ids(&self) -> Vec<TaskId> {
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.fields.is_empty())
            .map(|(task_id, _)| *task_id)
            .collect()
    }

    pub fn edit_state(&self, task_id: TaskId) -> EditState {
        match self.lock().get(&task_id) {
            Some(entry) if entry.committing => EditState::Committing,
            Some(entry) if !entry.fields.is_empty() => EditState::Dirty,
            _ => EditState::Clean,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.lock().values().all(|entry| entry.fields.is_empty())
    }

    /// Drops a task's queued edit on explicit user revert.
    pub fn discard(&self, task_id: TaskId) -> Option<PendingEdit> {
        self.lock().remove(&task_id).and_then(|entry| {
            (!entry.fields.is_empty()).then_some(PendingEdit {
                task_id,
                fields: entry.fields,
            })
        })
    }

    /// Commits every dirty task in the current snapshot.
    ///
    /// One `update_task_fields` call is issued per task. Successful tasks
    /// leave the queue unless they were edited again meanwhile; failed tasks
    /// stay dirty for the next round.
    pub fn commit_all<R>(&self, repo: &R) -> CommitSummary
    where
        R: TaskRepository + ?Sized,
    {
        let snapshot = self.take_snapshot();
        let mut summary = CommitSummary::default();

        for edit in snapshot {
            let fields = edit.fields.fields();
            let result = repo.update_task_fields(edit.task_id, &edit.fields);
            let mut entries = self.lock();

            match result {
                Ok(task) => {
                    info!(
                        "event=reconcile_commit module=reconcile status=ok session_id={} task_id={} field_count={}",
                        self.session_id,
                        edit.task_id,
                        fields.len()
                    );
                    if let Some(entry) = entries.get_mut(&edit.task_id) {
                        entry.committing = false;
                        entry
                            .fields
                            .retain(|field, value| edit.fields.get(*field) != Some(&*value));
                        if entry.fields.is_empty() {
                            entries.remove(&edit.task_id);
                        }
                    }
                    summary.committed.push(CommittedTask { task, fields });
                }
                Err(err) => {
                    let kind = err.kind();
                    warn!(
                        "event=reconcile_commit module=reconcile status=error session_id={} task_id={} error_code={} retryable={} error={}",
                        self.session_id,
                        edit.task_id,
                        kind.as_str(),
                        kind.is_retryable(),
                        err
                    );
                    if let Some(entry) = entries.get_mut(&edit.task_id) {
                        entry.committing = false;
                    }
                    summary.failures.push(CommitFailure {
                        task_id: edit.task_id,
                        fields,
                        kind,
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            "event=reconcile_round module=reconcile status={} session_id={} succeeded={} failed={}",
            if summary.all_saved() { "ok" } else { "partial" },
            self.session_id,
            summary.succeeded_count(),
            summary.failed_count()
        );
        summary
    }

    fn take_snapshot(&self) -> Vec<PendingEdit> {
        let mut entries = self.lock();
        entries
            .iter_mut()
            .filter(|(_, entry)| !entry.committing && !entry.fields.is_empty())
            .map(|(task_id, entry)| {
                entry.committing = true;
                PendingEdit {
                    task_id: *task_id,
                    fields: entry.fields.clone(),
                }
            })
            .collect()
    }

    fn merge(&self, task_id: TaskId, patch: FieldMap) {
        self.lock()
            .entry(task_id)
            .or_default()
            .fields
            .merge(patch);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TaskId, PendingEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Normalizes a multi-field patch the same way queued edits are.
///
/// When both `status` and `progress` are present, the explicit status choice
/// wins.
pub fn normalize_patch(fields: &FieldMap) -> Result<FieldMap, ReconcileError> {
    let mut patch = FieldMap::new();
    let mut status_choice = None;
    let mut progress_choice = None;
    for (field, value) in fields {
        let value = field.check(value.clone())?;
        match (*field, value) {
            (TaskField::Status, FieldValue::Status(status)) => {
                status_choice = Some(apply_status_choice(status)?);
            }
            (TaskField::Progress, FieldValue::Integer(raw)) => {
                progress_choice = Some(apply_progress(raw)?);
            }
            (field @ (TaskField::Status | TaskField::Progress), _) => {
                return Err(FieldError::InvalidValue {
                    field,
                    expected: "status name or integer",
                }
                .into())
            }
            (field, value) => {
                patch.insert(field, value);
            }
        }
    }
    if let Some(choice) = status_choice.or(progress_choice) {
        insert_choice(&mut patch, choice);
    }
    Ok(patch)
}

fn insert_choice(patch: &mut FieldMap, choice: StatusChoice) {
    patch.insert(TaskField::Status, FieldValue::Status(choice.status));
    patch.insert(
        TaskField::Progress,
        FieldValue::Integer(i64::from(choice.progress)),
    );
}
