//! Task use-case service.
//!
//! # Responsibility
//! - Create, update and delete tasks through a `TaskRepository`.
//! - Run the delegation check after every write that can introduce a
//!   delegate.
//! - Materialize recurring series and extend them idempotently.
//! - Commit a `ChangeReconciler` round and follow up on delegate changes.
//!
//! # Invariants
//! - Progress-derived statuses are recomputed from progress before insert.
//! - A follow-up failure never undoes the write that triggered it; it is
//!   reported next to the saved task.
//! - Batch operations report per-item outcomes and never abort the batch on
//!   a single item failure.
//! - Re-materializing a series never duplicates a `(template, work_date)`
//!   instance.

use crate::config::EngineConfig;
use crate::lifecycle::delegation::{
    confirmation_state, ConfirmationState, DelegationError, DelegationSpawner, SpawnOutcome,
};
use crate::lifecycle::reconcile::{normalize_patch, ChangeReconciler, CommitSummary, ReconcileError};
use crate::lifecycle::recurrence::{
    expand_with_limit, instance_draft, resume_after, Occurrence, RecurrenceError,
};
use crate::lifecycle::status::derive_status;
use crate::model::field::{FieldMap, FieldValue, TaskField};
use crate::model::task::{NewTask, Task, TaskId, TaskStatus, TaskValidationError};
use crate::notify::NotificationSink;
use crate::repo::task_repo::{FailureKind, RepoError, TaskRepository};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for task use-cases.
#[derive(Debug)]
pub enum TaskServiceError {
    /// Target task does not exist.
    TaskNotFound(TaskId),
    /// Draft or resulting task breaks a task invariant.
    Validation(TaskValidationError),
    /// Field patch rejected before reaching storage.
    InvalidEdit(ReconcileError),
    Recurrence(RecurrenceError),
    /// Recurring drafts need a `work_date` to anchor the series.
    MissingWorkDate,
    /// `create_recurring` was given a draft without a rule.
    MissingRecurrence,
    /// `extend_recurring` target is not a series template.
    NotRecurring(TaskId),
    /// The rule produced no occurrence at all.
    EmptySeries,
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl TaskServiceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::TaskNotFound(_) => FailureKind::NotFound,
            Self::Repo(err) => err.kind(),
            Self::Validation(_)
            | Self::InvalidEdit(_)
            | Self::Recurrence(_)
            | Self::MissingWorkDate
            | Self::MissingRecurrence
            | Self::NotRecurring(_)
            | Self::EmptySeries => FailureKind::Validation,
        }
    }
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidEdit(err) => write!(f, "invalid edit: {err}"),
            Self::Recurrence(err) => write!(f, "invalid recurrence: {err}"),
            Self::MissingWorkDate => write!(f, "recurring task requires a workDate"),
            Self::MissingRecurrence => write!(f, "recurring task requires a recurrence rule"),
            Self::NotRecurring(id) => write!(f, "task {id} is not a recurring series template"),
            Self::EmptySeries => write!(f, "recurrence rule produced no occurrences"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::InvalidEdit(err) => Some(err),
            Self::Recurrence(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TaskServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::TaskNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<TaskValidationError> for TaskServiceError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ReconcileError> for TaskServiceError {
    fn from(value: ReconcileError) -> Self {
        Self::InvalidEdit(value)
    }
}

impl From<RecurrenceError> for TaskServiceError {
    fn from(value: RecurrenceError) -> Self {
        Self::Recurrence(value)
    }
}

/// A persisted task plus the outcome of its delegation check.
#[derive(Debug)]
pub struct SavedTask {
    pub task: Task,
    /// `NotRequested` also when the write did not touch delegation fields.
    pub follow_up: Result<SpawnOutcome, DelegationError>,
}

impl SavedTask {
    pub fn follow_up_task(&self) -> Option<&Task> {
        self.follow_up.as_ref().ok().and_then(SpawnOutcome::task)
    }
}

/// Result of materializing or extending a recurring series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSeries {
    /// Template task; it is occurrence 1 and keeps the rule.
    pub template: Task,
    /// Instances inserted by this call, in date order.
    pub instances: Vec<Task>,
    /// Occurrences that already had an instance.
    pub skipped: usize,
    /// `true` when the per-call cap stopped expansion early.
    pub truncated: bool,
    pub follow_ups_created: usize,
    pub follow_up_failures: usize,
}

/// Delegate view of one confirmation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub delegate: String,
    pub state: ConfirmationState,
    pub task: Task,
}

/// Delegation check run for one committed task.
#[derive(Debug)]
pub struct FollowUpCheck {
    pub task_id: TaskId,
    pub outcome: Result<SpawnOutcome, DelegationError>,
}

/// Outcome of `commit_pending`.
#[derive(Debug)]
pub struct ReconcileReport {
    pub summary: CommitSummary,
    pub follow_ups: Vec<FollowUpCheck>,
}

/// Per-row bulk upload outcome.
#[derive(Debug)]
pub struct BulkRow {
    /// Zero-based input row index.
    pub index: usize,
    pub outcome: Result<BulkCreated, TaskServiceError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCreated {
    pub task: Task,
    /// Extra instances materialized for a recurring row.
    pub instance_count: usize,
    pub follow_up_created: bool,
}

#[derive(Debug, Default)]
pub struct BulkUploadReport {
    pub rows: Vec<BulkRow>,
}

impl BulkUploadReport {
    pub fn created_count(&self) -> usize {
        self.rows.iter().filter(|row| row.outcome.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.rows.len() - self.created_count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDeleteFailure {
    pub task_id: TaskId,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteReport {
    pub deleted: Vec<TaskId>,
    pub failures: Vec<BulkDeleteFailure>,
}

#[derive(Debug, Default)]
struct Materialized {
    created: Vec<Task>,
    skipped: usize,
    follow_ups_created: usize,
    follow_up_failures: usize,
}

/// Task service facade over repository and notification implementations.
pub struct TaskService<R: TaskRepository, N: NotificationSink> {
    repo: R,
    notifier: N,
    config: EngineConfig,
    spawner: DelegationSpawner,
}

impl<R: TaskRepository, N: NotificationSink> TaskService<R, N> {
    /// Creates a service with default engine config.
    pub fn new(repo: R, notifier: N) -> Self {
        Self::with_config(repo, notifier, EngineConfig::default())
    }

    pub fn with_config(repo: R, notifier: N, config: EngineConfig) -> Self {
        let spawner = DelegationSpawner::new(&config);
        Self {
            repo,
            notifier,
            config,
            spawner,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task, TaskServiceError> {
        self.repo
            .find_task(id)?
            .ok_or(TaskServiceError::TaskNotFound(id))
    }

    /// Creates one task and spawns its confirmation task when delegated.
    ///
    /// A rule on the draft is stored as-is; use `create_recurring` to
    /// materialize the series.
    pub fn create_task(&self, draft: NewTask) -> Result<SavedTask, TaskServiceError> {
        let draft = normalize_draft(draft);
        draft.validate()?;
        self.insert_and_delegate(&draft)
    }

    /// Applies a partial update immediately, bypassing the edit queue.
    pub fn update_task(&self, id: TaskId, fields: &FieldMap) -> Result<SavedTask, TaskServiceError> {
        let patch = normalize_patch(fields)?;
        let task = self.repo.update_task_fields(id, &patch)?;
        let follow_up = self.follow_up_for(&task);
        Ok(SavedTask { task, follow_up })
    }

    pub fn set_progress(&self, id: TaskId, progress: i64) -> Result<SavedTask, TaskServiceError> {
        let fields = FieldMap::new().with(TaskField::Progress, FieldValue::Integer(progress));
        self.update_task(id, &fields)
    }

    pub fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<SavedTask, TaskServiceError> {
        let fields = FieldMap::new().with(TaskField::Status, FieldValue::Status(status));
        self.update_task(id, &fields)
    }

    /// Commits one reconciliation round.
    ///
    /// Every committed task that names a delegate gets a delegation check, so
    /// a confirmation task lost to an earlier failure is created on the next
    /// save. Check failures are reported, never rolled back.
    pub fn commit_pending(&self, reconciler: &ChangeReconciler) -> ReconcileReport {
        let summary = reconciler.commit_all(&self.repo);
        let follow_ups = summary
            .committed
            .iter()
            .filter(|committed| committed.task.requests_follow_up())
            .map(|committed| FollowUpCheck {
                task_id: committed.task.id,
                outcome: self.spawn_for(&committed.task),
            })
            .collect();
        ReconcileReport {
            summary,
            follow_ups,
        }
    }

    /// Creates tasks row by row. Rows carrying a rule become recurring series.
    pub fn bulk_upload(&self, rows: Vec<NewTask>) -> BulkUploadReport {
        let mut report = BulkUploadReport::default();
        for (index, row) in rows.into_iter().enumerate() {
            let outcome = if row.recurrence.is_some() {
                self.create_recurring(row).map(|series| BulkCreated {
                    instance_count: series.instances.len(),
                    follow_up_created: series.follow_ups_created > 0,
                    task: series.template,
                })
            } else {
                self.create_task(row).map(|saved| BulkCreated {
                    follow_up_created: matches!(saved.follow_up, Ok(SpawnOutcome::Created(_))),
                    instance_count: 0,
                    task: saved.task,
                })
            };
            if let Err(err) = &outcome {
                warn!(
                    "event=bulk_upload module=service status=row_error row={} error_code={} error={}",
                    index,
                    err.kind().as_str(),
                    err
                );
            }
            report.rows.push(BulkRow { index, outcome });
        }
        info!(
            "event=bulk_upload module=service status={} created={} failed={}",
            if report.failed_count() == 0 { "ok" } else { "partial" },
            report.created_count(),
            report.failed_count()
        );
        report
    }

    /// Deletes tasks one by one, reporting each failure separately.
    pub fn bulk_delete(&self, ids: &[TaskId]) -> BulkDeleteReport {
        let mut report = BulkDeleteReport::default();
        for &task_id in ids {
            match self.repo.delete_task(task_id) {
                Ok(()) => report.deleted.push(task_id),
                Err(err) => report.failures.push(BulkDeleteFailure {
                    task_id,
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            }
        }
        info!(
            "event=bulk_delete module=service status={} deleted={} failed={}",
            if report.failures.is_empty() { "ok" } else { "partial" },
            report.deleted.len(),
            report.failures.len()
        );
        report
    }

    /// Stores `draft` as a series template and materializes its instances.
    ///
    /// The template becomes occurrence 1: its `work_date` moves to the first
    /// matching date. Instances 2..N reference it through
    /// `recurring_parent_id`. The rule is validated before any write.
    pub fn create_recurring(&self, draft: NewTask) -> Result<RecurringSeries, TaskServiceError> {
        let rule = draft
            .recurrence
            .clone()
            .ok_or(TaskServiceError::MissingRecurrence)?;
        let start = draft.work_date.ok_or(TaskServiceError::MissingWorkDate)?;
        let mut template_draft = normalize_draft(draft);
        template_draft.validate()?;

        let expansion = expand_with_limit(&rule, start, self.config.max_recurrence_instances)?;
        let first = expansion
            .occurrences
            .first()
            .copied()
            .ok_or(TaskServiceError::EmptySeries)?;

        if first.date != start {
            template_draft.due_date = template_draft
                .due_date
                .map(|due| due.checked_add_signed(first.date - start).unwrap_or(first.date));
        }
        template_draft.work_date = Some(first.date);
        template_draft.recurring_parent_id = None;
        template_draft.recurring_sequence = Some(first.sequence);

        let template = self.insert_and_delegate(&template_draft)?;
        let template_follow_up = usize::from(
            template
                .follow_up
                .as_ref()
                .is_ok_and(SpawnOutcome::is_created),
        );
        let template_follow_up_failed = usize::from(template.follow_up.is_err());
        let batch = self.materialize(&template.task, &expansion.occurrences[1..])?;

        Ok(RecurringSeries {
            template: template.task,
            instances: batch.created,
            skipped: batch.skipped,
            truncated: expansion.truncated,
            follow_ups_created: batch.follow_ups_created + template_follow_up,
            follow_up_failures: batch.follow_up_failures + template_follow_up_failed,
        })
    }

    /// Continues a series after its latest stored instance.
    ///
    /// Safe to call repeatedly: dates that already have an instance are
    /// skipped.
    pub fn extend_recurring(&self, template_id: TaskId) -> Result<RecurringSeries, TaskServiceError> {
        let template = self.get_task(template_id)?;
        let rule = template
            .recurrence
            .clone()
            .ok_or(TaskServiceError::NotRecurring(template_id))?;
        let anchor = template.work_date.ok_or(TaskServiceError::MissingWorkDate)?;

        let last = self
            .repo
            .list_recurring_instances(template_id)?
            .iter()
            .filter_map(|instance| {
                Some(Occurrence {
                    sequence: instance.recurring_sequence?,
                    date: instance.work_date?,
                })
            })
            .max_by_key(|occurrence| (occurrence.sequence, occurrence.date))
            .unwrap_or(Occurrence {
                sequence: template.recurring_sequence.unwrap_or(1),
                date: anchor,
            });

        let expansion = resume_after(&rule, anchor, last, self.config.max_recurrence_instances)?;
        let batch = self.materialize(&template, &expansion.occurrences)?;
        Ok(RecurringSeries {
            template,
            instances: batch.created,
            skipped: batch.skipped,
            truncated: expansion.truncated,
            follow_ups_created: batch.follow_ups_created,
            follow_up_failures: batch.follow_up_failures,
        })
    }

    /// Lists confirmation tasks for `parent_id` with their delegate answers.
    pub fn confirmations(&self, parent_id: TaskId) -> Result<Vec<Confirmation>, TaskServiceError> {
        self.get_task(parent_id)?;
        Ok(self
            .repo
            .list_follow_ups(parent_id)?
            .into_iter()
            .map(|task| Confirmation {
                delegate: task.assigned_to.clone(),
                state: confirmation_state(&task),
                task,
            })
            .collect())
    }

    fn insert_and_delegate(&self, draft: &NewTask) -> Result<SavedTask, TaskServiceError> {
        let task = self.repo.insert_task(draft)?;
        info!(
            "event=task_create module=service status=ok task_id={} recurring_parent_id={}",
            task.id,
            task.recurring_parent_id.unwrap_or_default()
        );
        let follow_up = self.spawn_for(&task);
        Ok(SavedTask { task, follow_up })
    }

    fn follow_up_for(&self, task: &Task) -> Result<SpawnOutcome, DelegationError> {
        if task.requests_follow_up() {
            self.spawn_for(task)
        } else {
            Ok(SpawnOutcome::NotRequested)
        }
    }

    fn spawn_for(&self, task: &Task) -> Result<SpawnOutcome, DelegationError> {
        let outcome = self
            .spawner
            .maybe_spawn_follow_up(&self.repo, &self.notifier, task);
        if let Err(err) = &outcome {
            warn!(
                "event=follow_up_spawn module=service status=error task_id={} error={}",
                task.id, err
            );
        }
        outcome
    }

    fn materialize(
        &self,
        template: &Task,
        occurrences: &[Occurrence],
    ) -> Result<Materialized, TaskServiceError> {
        let mut existing: BTreeSet<NaiveDate> = self
            .repo
            .list_recurring_instances(template.id)?
            .into_iter()
            .filter_map(|instance| instance.work_date)
            .collect();
        existing.extend(template.work_date);

        let mut batch = Materialized::default();
        for occurrence in occurrences {
            if existing.contains(&occurrence.date) {
                batch.skipped += 1;
                continue;
            }
            let draft = instance_draft(template, *occurrence, &self.config.recurrence_ordinal_suffix);
            match self.repo.insert_task(&draft) {
                Ok(instance) => {
                    match self.spawn_for(&instance) {
                        Ok(SpawnOutcome::Created(_)) => batch.follow_ups_created += 1,
                        Ok(_) => {}
                        Err(_) => batch.follow_up_failures += 1,
                    }
                    batch.created.push(instance);
                }
                Err(RepoError::Conflict(_)) => batch.skipped += 1,
                Err(err) => return Err(err.into()),
            }
        }

        info!(
            "event=recurrence_materialize module=service status=ok template_id={} created={} skipped={}",
            template.id,
            batch.created.len(),
            batch.skipped
        );
        Ok(batch)
    }
}

/// Recomputes progress-derived statuses from the draft's progress.
fn normalize_draft(mut draft: NewTask) -> NewTask {
    if draft.status.is_progress_derived() {
        draft.status = derive_status(draft.progress);
    }
    draft
}
