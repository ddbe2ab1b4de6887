#![allow(dead_code)]

use chrono::NaiveDate;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use taskflow_core::{
    FieldMap, NewTask, NotificationSink, NotifyError, RepoError, RepoResult, Task, TaskId,
    TaskRepository,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Injected failure for one task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    NotFound,
}

/// In-memory repository that records calls and injects faults.
#[derive(Default)]
pub struct ScriptedRepo {
    tasks: RefCell<BTreeMap<TaskId, Task>>,
    next_id: Cell<TaskId>,
    update_calls: RefCell<Vec<(TaskId, FieldMap)>>,
    faults: RefCell<BTreeMap<TaskId, Fault>>,
    /// Next follow-up insert loses a race against a concurrent spawner.
    lose_next_follow_up_race: Cell<bool>,
    /// Next follow-up insert times out.
    fail_next_follow_up_insert: Cell<bool>,
    inserts: Cell<usize>,
}

impl ScriptedRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, draft: &NewTask) -> Task {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let task = stored(id, draft);
        self.tasks.borrow_mut().insert(id, task.clone());
        task
    }

    pub fn fail(&self, id: TaskId, fault: Fault) {
        self.faults.borrow_mut().insert(id, fault);
    }

    pub fn heal(&self, id: TaskId) {
        self.faults.borrow_mut().remove(&id);
    }

    pub fn lose_next_follow_up_race(&self) {
        self.lose_next_follow_up_race.set(true);
    }

    pub fn fail_next_follow_up_insert(&self) {
        self.fail_next_follow_up_insert.set(true);
    }

    pub fn update_calls(&self) -> Vec<(TaskId, FieldMap)> {
        self.update_calls.borrow().clone()
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.get()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks.borrow().get(&id).cloned()
    }

    pub fn follow_up_count(&self, parent_id: TaskId) -> usize {
        self.tasks
            .borrow()
            .values()
            .filter(|task| task.is_follow_up_task && task.parent_task_id == Some(parent_id))
            .count()
    }

    fn fault_for(&self, id: TaskId) -> RepoResult<()> {
        match self.faults.borrow().get(&id) {
            Some(Fault::Transient) => Err(RepoError::Transient("database is locked".to_string())),
            Some(Fault::NotFound) => Err(RepoError::NotFound(id)),
            None => Ok(()),
        }
    }
}

impl TaskRepository for ScriptedRepo {
    fn find_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        Ok(self.task(id))
    }

    fn find_follow_up(&self, parent_task_id: TaskId, assignee: &str) -> RepoResult<Option<Task>> {
        Ok(self
            .tasks
            .borrow()
            .values()
            .find(|task| {
                task.is_follow_up_task
                    && task.parent_task_id == Some(parent_task_id)
                    && task.assigned_to == assignee
            })
            .cloned())
    }

    fn list_follow_ups(&self, parent_task_id: TaskId) -> RepoResult<Vec<Task>> {
        Ok(self
            .tasks
            .borrow()
            .values()
            .filter(|task| task.is_follow_up_task && task.parent_task_id == Some(parent_task_id))
            .cloned()
            .collect())
    }

    fn list_recurring_instances(&self, template_id: TaskId) -> RepoResult<Vec<Task>> {
        Ok(self
            .tasks
            .borrow()
            .values()
            .filter(|task| task.recurring_parent_id == Some(template_id))
            .cloned()
            .collect())
    }

    fn insert_task(&self, task: &NewTask) -> RepoResult<Task> {
        task.validate()?;
        if task.is_follow_up_task && self.fail_next_follow_up_insert.replace(false) {
            return Err(RepoError::Transient("database is locked".to_string()));
        }
        if task.is_follow_up_task && self.lose_next_follow_up_race.replace(false) {
            self.seed(task);
            return Err(RepoError::Conflict(
                "UNIQUE constraint failed: tasks.parent_task_id, tasks.assigned_to".to_string(),
            ));
        }
        self.inserts.set(self.inserts.get() + 1);
        Ok(self.seed(task))
    }

    fn update_task_fields(&self, id: TaskId, fields: &FieldMap) -> RepoResult<Task> {
        self.update_calls.borrow_mut().push((id, fields.clone()));
        self.fault_for(id)?;
        let mut tasks = self.tasks.borrow_mut();
        let task = tasks.get_mut(&id).ok_or(RepoError::NotFound(id))?;
        let mut updated = task.clone();
        updated.apply_fields(fields)?;
        updated.validate()?;
        *task = updated.clone();
        Ok(updated)
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        self.tasks
            .borrow_mut()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound(id))
    }
}

/// Sink that always fails.
pub struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify_delegation(&self, _delegate_id: &str, _task: &Task) -> Result<(), NotifyError> {
        Err(NotifyError("push gateway unreachable".to_string()))
    }
}

/// Distinct work dates of `tasks`.
pub fn work_dates(tasks: &[Task]) -> BTreeSet<NaiveDate> {
    tasks.iter().filter_map(|task| task.work_date).collect()
}

fn stored(id: TaskId, draft: &NewTask) -> Task {
    Task {
        id,
        title: draft.title.clone(),
        description: draft.description.clone(),
        category: draft.category.clone(),
        status: draft.status,
        progress: draft.progress,
        priority: draft.priority,
        assigned_to: draft.assigned_to.clone(),
        created_by: draft.created_by.clone(),
        follow_up_assignee: draft.follow_up_assignee.clone(),
        follow_up_memo: draft.follow_up_memo.clone(),
        follow_up_type: draft.follow_up_type.clone(),
        is_follow_up_task: draft.is_follow_up_task,
        parent_task_id: draft.parent_task_id,
        work_date: draft.work_date,
        due_date: draft.due_date,
        recurrence: draft.recurrence.clone(),
        recurring_parent_id: draft.recurring_parent_id,
        recurring_sequence: draft.recurring_sequence,
        created_at: 0,
        updated_at: 0,
    }
}
