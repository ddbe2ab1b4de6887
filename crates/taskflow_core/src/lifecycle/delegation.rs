//! Follow-up confirmation spawning.
//!
//! # Responsibility
//! - Decide whether a delegated task needs a confirmation task.
//! - Build and persist that confirmation task exactly once per delegate.
//! - Derive the confirmation state shown next to the parent task.
//!
//! # Invariants
//! - At most one follow-up exists per `(parent_task_id, assignee)`; a lost
//!   insert race resolves to the winner's record, not an error.
//! - A follow-up is only created for a parent that exists at spawn time.
//! - Notification failures never fail the spawn.
//! - The parent task is never mutated here.

use crate::config::EngineConfig;
use crate::model::task::{NewTask, Task, TaskId, TaskStatus};
use crate::notify::NotificationSink;
use crate::repo::task_repo::{RepoError, TaskRepository};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result of one spawn check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// No delegate, or the delegate is the assignee.
    NotRequested,
    /// A confirmation task already existed and was returned unchanged.
    Existing(Task),
    /// A confirmation task was created by this call.
    Created(Task),
}

impl SpawnOutcome {
    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::NotRequested => None,
            Self::Existing(task) | Self::Created(task) => Some(task),
        }
    }

    pub fn into_task(self) -> Option<Task> {
        match self {
            Self::NotRequested => None,
            Self::Existing(task) | Self::Created(task) => Some(task),
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Hard spawn failure. No partial task is left behind.
#[derive(Debug)]
pub enum DelegationError {
    /// The parent id does not resolve to a stored task.
    ParentNotFound(TaskId),
    Repo(RepoError),
}

impl Display for DelegationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParentNotFound(id) => write!(f, "delegation parent task not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DelegationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::ParentNotFound(_) => None,
        }
    }
}

impl From<RepoError> for DelegationError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::ParentNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Delegate-facing view of a confirmation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    Rejected,
}

impl ConfirmationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }
}

/// Reads the delegate's answer off a confirmation task's status.
pub fn confirmation_state(follow_up: &Task) -> ConfirmationState {
    match follow_up.status {
        TaskStatus::Completed => ConfirmationState::Confirmed,
        TaskStatus::Cancelled => ConfirmationState::Rejected,
        TaskStatus::Pending
        | TaskStatus::Scheduled
        | TaskStatus::InProgress
        | TaskStatus::Postponed => ConfirmationState::Pending,
    }
}

/// Builds and deduplicates confirmation tasks for delegated work.
#[derive(Debug, Clone)]
pub struct DelegationSpawner {
    title_prefix: String,
    follow_up_type: String,
}

impl Default for DelegationSpawner {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl DelegationSpawner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            title_prefix: config.follow_up_title_prefix.clone(),
            follow_up_type: config.follow_up_type.clone(),
        }
    }

    /// Ensures the confirmation task for `task`'s delegate exists.
    ///
    /// # Contract
    /// - Returns `NotRequested` when no delegate is set or the delegate is the
    ///   assignee.
    /// - Returns the stored follow-up unchanged when one already exists.
    /// - Otherwise inserts one, notifies the delegate and returns it.
    ///
    /// # Errors
    /// - `ParentNotFound` when `task.id` is not stored.
    /// - `Repo` for lookup/insert failures, including timeouts.
    pub fn maybe_spawn_follow_up<R, N>(
        &self,
        repo: &R,
        notifier: &N,
        task: &Task,
    ) -> Result<SpawnOutcome, DelegationError>
    where
        R: TaskRepository + ?Sized,
        N: NotificationSink + ?Sized,
    {
        if !task.requests_follow_up() {
            debug!(
                "event=follow_up_spawn module=delegation status=skip task_id={} reason=not_requested",
                task.id
            );
            return Ok(SpawnOutcome::NotRequested);
        }
        let delegate = match task.follow_up_assignee.as_deref() {
            Some(delegate) => delegate.trim(),
            None => return Ok(SpawnOutcome::NotRequested),
        };

        if let Some(existing) = repo.find_follow_up(task.id, delegate)? {
            debug!(
                "event=follow_up_spawn module=delegation status=existing task_id={} follow_up_id={}",
                task.id, existing.id
            );
            return Ok(SpawnOutcome::Existing(existing));
        }

        let parent = repo
            .find_task(task.id)?
            .ok_or(DelegationError::ParentNotFound(task.id))?;
        let draft = self.build_follow_up(&parent, delegate);

        match repo.insert_task(&draft) {
            Ok(created) => {
                info!(
                    "event=follow_up_spawn module=delegation status=created task_id={} follow_up_id={} delegate={}",
                    parent.id, created.id, delegate
                );
                if let Err(err) = notifier.notify_delegation(delegate, &created) {
                    warn!(
                        "event=delegation_notify module=delegation status=error task_id={} follow_up_id={} error={}",
                        parent.id, created.id, err
                    );
                }
                Ok(SpawnOutcome::Created(created))
            }
            Err(RepoError::Conflict(detail)) => {
                // Another spawn for the same key won the insert.
                info!(
                    "event=follow_up_spawn module=delegation status=conflict task_id={} delegate={} detail={}",
                    parent.id, delegate, detail
                );
                repo.find_follow_up(parent.id, delegate)?
                    .map(SpawnOutcome::Existing)
                    .ok_or(DelegationError::Repo(RepoError::Conflict(detail)))
            }
            Err(err) => {
                error!(
                    "event=follow_up_spawn module=delegation status=error task_id={} error_code={} error={}",
                    parent.id,
                    err.kind().as_str(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Builds the confirmation draft for `parent` assigned to `delegate`.
    pub fn build_follow_up(&self, parent: &Task, delegate: &str) -> NewTask {
        let mut draft = NewTask::new(
            format!("{} {}", self.title_prefix, parent.title),
            delegate.trim(),
            parent.created_by.clone(),
        );
        draft.description = compose_description(parent);
        draft.category = parent.category.clone();
        draft.priority = parent.priority;
        draft.status = TaskStatus::Pending;
        draft.progress = 0;
        draft.is_follow_up_task = true;
        draft.parent_task_id = Some(parent.id);
        draft.follow_up_type = Some(self.follow_up_type.clone());
        draft.work_date = parent.work_date;
        draft.due_date = parent.due_date;
        draft
    }
}

fn compose_description(parent: &Task) -> String {
    let mut lines = vec![
        format!("확인 요청 업무: {}", parent.title),
        format!("분류: {}", parent.category.as_deref().unwrap_or("-")),
        format!("요청자: {}", parent.assigned_to),
    ];
    if let Some(memo) = parent
        .follow_up_memo
        .as_deref()
        .map(str::trim)
        .filter(|memo| !memo.is_empty())
    {
        lines.push(format!("메모: {memo}"));
    }
    lines.join("\n")
}
