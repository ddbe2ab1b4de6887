mod common;

use common::{Fault, ScriptedRepo};
use std::cell::{Cell, RefCell};
use taskflow_core::db::open_db_in_memory;
use taskflow_core::{
    ChangeReconciler, EditState, FailureKind, FieldMap, FieldValue, NewTask, RepoResult,
    SqliteTaskRepository, Task, TaskField, TaskId, TaskRepository, TaskStatus,
};

/// Queues `late_edit` on the reconciler while the first update is in flight.
struct EditDuringCommit<'a> {
    inner: ScriptedRepo,
    reconciler: &'a ChangeReconciler,
    late_edit: RefCell<Option<(TaskId, FieldMap)>>,
    state_in_flight: Cell<Option<EditState>>,
}

impl TaskRepository for EditDuringCommit<'_> {
    fn find_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        self.inner.find_task(id)
    }

    fn find_follow_up(&self, parent_task_id: TaskId, assignee: &str) -> RepoResult<Option<Task>> {
        self.inner.find_follow_up(parent_task_id, assignee)
    }

    fn list_follow_ups(&self, parent_task_id: TaskId) -> RepoResult<Vec<Task>> {
        self.inner.list_follow_ups(parent_task_id)
    }

    fn list_recurring_instances(&self, template_id: TaskId) -> RepoResult<Vec<Task>> {
        self.inner.list_recurring_instances(template_id)
    }

    fn insert_task(&self, task: &NewTask) -> RepoResult<Task> {
        self.inner.insert_task(task)
    }

    fn update_task_fields(&self, id: TaskId, fields: &FieldMap) -> RepoResult<Task> {
        if let Some((task_id, late)) = self.late_edit.borrow_mut().take() {
            self.state_in_flight.set(Some(self.reconciler.edit_state(task_id)));
            self.reconciler.queue_fields(task_id, &late).unwrap();
        }
        self.inner.update_task_fields(id, fields)
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        self.inner.delete_task(id)
    }
}

#[test]
fn edits_to_one_task_merge_into_a_single_update() {
    let repo = ScriptedRepo::new();
    let task = repo.seed(&NewTask::new("초안", "alice", "alice"));
    let reconciler = ChangeReconciler::new();

    reconciler
        .queue_edit(task.id, TaskField::Title, FieldValue::text("1차"))
        .unwrap();
    reconciler
        .queue_fields(
            task.id,
            &FieldMap::new()
                .with(TaskField::Title, FieldValue::text("2차"))
                .with(TaskField::Category, FieldValue::text("기획")),
        )
        .unwrap();

    let summary = reconciler.commit_all(&repo);

    let calls = repo.update_calls();
    assert_eq!(calls.len(), 1);
    let (id, fields) = &calls[0];
    assert_eq!(*id, task.id);
    assert_eq!(fields.len(), 2);
    assert_eq!(fields.get(TaskField::Title), Some(&FieldValue::text("2차")));
    assert_eq!(fields.get(TaskField::Category), Some(&FieldValue::text("기획")));
    assert!(summary.all_saved());
    assert!(reconciler.is_clean());
}

#[test]
fn one_failure_does_not_block_other_tasks() {
    let repo = ScriptedRepo::new();
    let x = repo.seed(&NewTask::new("X", "alice", "alice"));
    let y = repo.seed(&NewTask::new("Y", "alice", "alice"));
    repo.fail(x.id, Fault::Transient);
    let reconciler = ChangeReconciler::new();

    reconciler.queue_progress(x.id, 30).unwrap();
    reconciler.queue_progress(y.id, 60).unwrap();
    let summary = reconciler.commit_all(&repo);

    assert_eq!(summary.succeeded_count(), 1);
    assert_eq!(summary.failed_count(), 1);
    assert_eq!(summary.to_string(), "1 succeeded, 1 failed");
    assert_eq!(summary.committed_task_ids(), vec![y.id]);
    assert_eq!(summary.failures[0].task_id, x.id);
    assert_eq!(summary.failures[0].kind, FailureKind::Transient);
    assert!(summary.failures[0].kind.is_retryable());

    assert_eq!(reconciler.edit_state(x.id), EditState::Dirty);
    assert_eq!(reconciler.edit_state(y.id), EditState::Clean);
    assert_eq!(repo.task(y.id).unwrap().status, TaskStatus::InProgress);
}

#[test]
fn edits_queued_during_a_commit_wait_for_the_next_round() {
    let reconciler = ChangeReconciler::new();
    let inner = ScriptedRepo::new();
    let task = inner.seed(&NewTask::new("초안", "alice", "alice"));
    let repo = EditDuringCommit {
        inner,
        reconciler: &reconciler,
        late_edit: RefCell::new(Some((
            task.id,
            FieldMap::new()
                .with(TaskField::Title, FieldValue::text("B"))
                .with(TaskField::Category, FieldValue::text("c"))
                .with(TaskField::Description, FieldValue::text("메모")),
        ))),
        state_in_flight: Cell::new(None),
    };

    reconciler
        .queue_fields(
            task.id,
            &FieldMap::new()
                .with(TaskField::Title, FieldValue::text("A"))
                .with(TaskField::Category, FieldValue::text("c")),
        )
        .unwrap();
    let first = reconciler.commit_all(&repo);

    assert!(first.all_saved());
    assert_eq!(repo.state_in_flight.get(), Some(EditState::Committing));
    let calls = repo.inner.update_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.get(TaskField::Title), Some(&FieldValue::text("A")));
    assert_eq!(repo.inner.task(task.id).unwrap().title, "A");

    assert_eq!(reconciler.edit_state(task.id), EditState::Dirty);
    let pending = reconciler.pending_edit(task.id).unwrap();
    assert_eq!(pending.fields.len(), 2);
    assert_eq!(pending.fields.get(TaskField::Title), Some(&FieldValue::text("B")));
    assert_eq!(
        pending.fields.get(TaskField::Description),
        Some(&FieldValue::text("메모"))
    );
    assert_eq!(pending.fields.get(TaskField::Category), None);

    let second = reconciler.commit_all(&repo);
    assert!(second.all_saved());
    assert_eq!(repo.inner.task(task.id).unwrap().title, "B");
    assert!(reconciler.is_clean());
}

#[test]
fn failed_edit_is_retried_on_the_next_round() {
    let repo = ScriptedRepo::new();
    let x = repo.seed(&NewTask::new("X", "alice", "alice"));
    repo.fail(x.id, Fault::Transient);
    let reconciler = ChangeReconciler::new();

    reconciler.queue_progress(x.id, 100).unwrap();
    assert!(!reconciler.commit_all(&repo).all_saved());

    repo.heal(x.id);
    let retry = reconciler.commit_all(&repo);
    assert!(retry.all_saved());
    assert_eq!(repo.task(x.id).unwrap().status, TaskStatus::Completed);
    assert!(reconciler.is_clean());
    assert_eq!(repo.update_calls().len(), 2);
}

#[test]
fn edits_queued_after_a_failure_merge_into_the_retry() {
    let repo = ScriptedRepo::new();
    let x = repo.seed(&NewTask::new("X", "alice", "alice"));
    repo.fail(x.id, Fault::Transient);
    let reconciler = ChangeReconciler::new();

    reconciler.queue_progress(x.id, 20).unwrap();
    reconciler.commit_all(&repo);
    reconciler.queue_progress(x.id, 40).unwrap();

    let pending = reconciler.pending_edit(x.id).unwrap();
    assert_eq!(pending.fields.get(TaskField::Progress), Some(&FieldValue::Integer(40)));
}

#[test]
fn deleted_task_reports_not_found_distinct_from_transient() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let task = repo.insert_task(&NewTask::new("삭제 예정", "alice", "alice")).unwrap();
    let reconciler = ChangeReconciler::new();

    reconciler
        .queue_edit(task.id, TaskField::Title, FieldValue::text("수정"))
        .unwrap();
    repo.delete_task(task.id).unwrap();
    let summary = reconciler.commit_all(&repo);

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].kind, FailureKind::NotFound);
    assert_eq!(summary.failures[0].kind.as_str(), "task_not_found");
    assert!(!summary.failures[0].kind.is_retryable());
    assert_eq!(reconciler.edit_state(task.id), EditState::Dirty);
}

#[test]
fn commit_against_sqlite_updates_only_listed_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let mut draft = NewTask::new("회의록", "alice", "alice");
    draft.description = "원본".to_string();
    let task = repo.insert_task(&draft).unwrap();
    let reconciler = ChangeReconciler::new();

    reconciler.queue_status(task.id, TaskStatus::Completed).unwrap();
    let summary = reconciler.commit_all(&repo);

    let saved = &summary.committed[0].task;
    assert_eq!(saved.status, TaskStatus::Completed);
    assert_eq!(saved.progress, 100);
    assert_eq!(saved.description, "원본");
    assert_eq!(saved.title, "회의록");
}

#[test]
fn wire_patch_is_accepted_with_either_field_spelling() {
    let repo = ScriptedRepo::new();
    let task = repo.seed(&NewTask::new("초안", "alice", "alice"));
    let reconciler = ChangeReconciler::new();

    let patch = FieldMap::from_wire_json(&serde_json::json!({
        "followUpMemo": "내일까지",
        "due_date": "2025-02-01",
    }))
    .unwrap();
    reconciler.queue_fields(task.id, &patch).unwrap();
    reconciler.commit_all(&repo);

    let saved = repo.task(task.id).unwrap();
    assert_eq!(saved.follow_up_memo.as_deref(), Some("내일까지"));
    assert_eq!(saved.due_date, Some(common::date(2025, 2, 1)));
}

#[test]
fn empty_round_reports_nothing() {
    let repo = ScriptedRepo::new();
    let summary = ChangeReconciler::new().commit_all(&repo);
    assert_eq!(summary.succeeded_count(), 0);
    assert!(summary.all_saved());
    assert!(repo.update_calls().is_empty());
}
