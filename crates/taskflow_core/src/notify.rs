//! Delegation notification boundary.
//!
//! # Responsibility
//! - Define the fire-and-forget sink told about newly spawned confirmation
//!   tasks.
//! - Provide a logging sink and an in-memory outbox sink.
//!
//! # Invariants
//! - Sink failures never fail the spawn that triggered them; callers log and
//!   move on.

use crate::model::task::{Task, TaskId};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// Record emitted for one newly created confirmation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationNotice {
    pub delegate_id: String,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "delegation notification failed: {}", self.0)
    }
}

impl Error for NotifyError {}

/// External notification channel for delegates.
pub trait NotificationSink {
    fn notify_delegation(&self, delegate_id: &str, task: &Task) -> Result<(), NotifyError>;
}

impl<N: NotificationSink + ?Sized> NotificationSink for &N {
    fn notify_delegation(&self, delegate_id: &str, task: &Task) -> Result<(), NotifyError> {
        (**self).notify_delegation(delegate_id, task)
    }
}

impl<N: NotificationSink + ?Sized> NotificationSink for Arc<N> {
    fn notify_delegation(&self, delegate_id: &str, task: &Task) -> Result<(), NotifyError> {
        (**self).notify_delegation(delegate_id, task)
    }
}

/// Sink that only records a metadata log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify_delegation(&self, delegate_id: &str, task: &Task) -> Result<(), NotifyError> {
        info!(
            "event=delegation_notify module=notify status=ok task_id={} parent_task_id={} delegate={}",
            task.id,
            task.parent_task_id.unwrap_or_default(),
            delegate_id
        );
        Ok(())
    }
}

/// Outbox sink keeping every notice in memory until drained.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    notices: Mutex<Vec<DelegationNotice>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded notices, oldest first.
    pub fn notices(&self) -> Vec<DelegationNotice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Removes and returns all recorded notices.
    pub fn drain(&self) -> Vec<DelegationNotice> {
        match self.notices.lock() {
            Ok(mut notices) => std::mem::take(&mut *notices),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Ids of tasks notified so far.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.notices().iter().map(|notice| notice.task.id).collect()
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn notify_delegation(&self, delegate_id: &str, task: &Task) -> Result<(), NotifyError> {
        let notice = DelegationNotice {
            delegate_id: delegate_id.to_string(),
            task: task.clone(),
        };
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
        Ok(())
    }
}
