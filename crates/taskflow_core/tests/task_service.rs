mod common;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use common::{date, work_dates, FailingSink, ScriptedRepo};
use taskflow_core::db::open_db_in_memory;
use taskflow_core::{
    ChangeReconciler, ConfirmationState, DelegationError, EngineConfig, FailureKind, FieldMap,
    FieldValue, MemoryNotificationSink, NewTask, RecurrenceError, RecurrenceKind, RecurrenceRule,
    RepoError, SpawnOutcome, SqliteTaskRepository, TaskField, TaskPriority, TaskRepository,
    TaskService, TaskServiceError, TaskStatus,
};

fn delegated(title: &str) -> NewTask {
    let mut draft = NewTask::new(title, "alice", "alice");
    draft.follow_up_assignee = Some("bob".to_string());
    draft
}

#[test]
fn delegated_task_spawns_one_pending_confirmation() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let saved = service.create_task(delegated("예산안 검토")).unwrap();
    let follow_up = saved.follow_up_task().unwrap().clone();
    assert_eq!(follow_up.title, "[확인요청] 예산안 검토");
    assert_eq!(follow_up.assigned_to, "bob");
    assert_eq!(follow_up.status, TaskStatus::Pending);
    assert_eq!(follow_up.parent_task_id, Some(saved.task.id));
    assert_eq!(service.notifier().task_ids(), vec![follow_up.id]);

    let again = service
        .update_task(
            saved.task.id,
            &FieldMap::new().with(TaskField::FollowUpAssignee, FieldValue::text("bob")),
        )
        .unwrap();
    assert!(matches!(again.follow_up, Ok(SpawnOutcome::Existing(_))));
    assert_eq!(service.repo().list_follow_ups(saved.task.id).unwrap().len(), 1);
    assert_eq!(service.notifier().notices().len(), 1);
}

#[test]
fn confirmation_state_tracks_the_delegate_answer() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let saved = service.create_task(delegated("예산안 검토")).unwrap();
    let follow_up_id = saved.follow_up_task().unwrap().id;

    let states = service.confirmations(saved.task.id).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].delegate, "bob");
    assert_eq!(states[0].state, ConfirmationState::Pending);

    service.set_status(follow_up_id, TaskStatus::Completed).unwrap();
    let states = service.confirmations(saved.task.id).unwrap();
    assert_eq!(states[0].state, ConfirmationState::Confirmed);

    let parent = service.get_task(saved.task.id).unwrap();
    assert_eq!(parent.status, TaskStatus::Scheduled);
}

#[test]
fn confirmations_of_missing_parent_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());
    let err = service.confirmations(77).unwrap_err();
    assert!(matches!(err, TaskServiceError::TaskNotFound(77)));
    assert_eq!(err.kind(), FailureKind::NotFound);
}

#[test]
fn notification_outage_does_not_fail_task_creation() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, FailingSink);

    let saved = service.create_task(delegated("예산안 검토")).unwrap();
    assert!(matches!(saved.follow_up, Ok(SpawnOutcome::Created(_))));
}

#[test]
fn reassigning_through_the_reconciler_spawns_for_the_new_delegate() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());
    let reconciler = ChangeReconciler::new();

    let task = service
        .create_task(NewTask::new("계약 갱신", "alice", "alice"))
        .unwrap()
        .task;
    reconciler
        .queue_edit(task.id, TaskField::FollowUpAssignee, FieldValue::text("dave"))
        .unwrap();
    reconciler.queue_progress(task.id, 10).unwrap();

    let report = service.commit_pending(&reconciler);
    assert!(report.summary.all_saved());
    assert_eq!(report.follow_ups.len(), 1);
    let spawned = report.follow_ups[0].outcome.as_ref().unwrap();
    assert!(spawned.is_created());
    assert_eq!(spawned.task().unwrap().assigned_to, "dave");
    assert!(reconciler.is_clean());
}

#[test]
fn later_saves_recover_a_confirmation_lost_at_creation() {
    let repo = ScriptedRepo::new();
    repo.fail_next_follow_up_insert();
    let service = TaskService::new(repo, MemoryNotificationSink::new());
    let reconciler = ChangeReconciler::new();

    let saved = service.create_task(delegated("예산안 검토")).unwrap();
    assert!(matches!(
        saved.follow_up,
        Err(DelegationError::Repo(RepoError::Transient(_)))
    ));
    assert_eq!(service.repo().follow_up_count(saved.task.id), 0);

    reconciler.queue_progress(saved.task.id, 40).unwrap();
    let report = service.commit_pending(&reconciler);
    assert!(report.summary.all_saved());
    assert_eq!(report.summary.committed[0].task.status, TaskStatus::InProgress);
    assert_eq!(report.follow_ups.len(), 1);
    assert!(report.follow_ups[0].outcome.as_ref().unwrap().is_created());
    assert_eq!(service.repo().follow_up_count(saved.task.id), 1);

    let again = service.set_progress(saved.task.id, 60).unwrap();
    assert!(matches!(again.follow_up, Ok(SpawnOutcome::Existing(_))));
    assert_eq!(service.repo().follow_up_count(saved.task.id), 1);
    assert_eq!(service.notifier().notices().len(), 1);
}

#[test]
fn undelegated_saves_skip_the_delegation_check() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());
    let reconciler = ChangeReconciler::new();

    let task = service
        .create_task(NewTask::new("계약 갱신", "alice", "alice"))
        .unwrap()
        .task;
    reconciler.queue_progress(task.id, 50).unwrap();
    let report = service.commit_pending(&reconciler);

    assert!(report.follow_ups.is_empty());
    let updated = service.set_progress(task.id, 70).unwrap();
    assert!(matches!(updated.follow_up, Ok(SpawnOutcome::NotRequested)));
}

#[test]
fn shifted_template_due_date_falls_back_to_the_first_date_at_the_calendar_edge() {
    let service = TaskService::new(ScriptedRepo::new(), MemoryNotificationSink::new());
    let last_day = NaiveDate::MAX;
    let start = last_day.checked_sub_days(Days::new(6)).unwrap();

    let mut draft = NewTask::new("마감 점검", "alice", "alice");
    draft.work_date = Some(start);
    draft.due_date = Some(last_day);
    draft.recurrence = Some(
        RecurrenceRule::until(RecurrenceKind::Weekly, last_day).with_days(vec![last_day.weekday()]),
    );
    let series = service.create_recurring(draft).unwrap();

    assert_eq!(series.template.work_date, Some(last_day));
    assert_eq!(series.template.due_date, Some(last_day));
    assert!(series.instances.is_empty());
}

#[test]
fn daily_series_materializes_every_date_once() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let mut draft = NewTask::new("일일 점검", "alice", "alice");
    draft.category = Some("운영".to_string());
    draft.priority = TaskPriority::Urgent;
    draft.work_date = Some(date(2025, 1, 1));
    draft.recurrence = Some(RecurrenceRule::until(RecurrenceKind::Daily, date(2025, 1, 5)));
    let series = service.create_recurring(draft).unwrap();

    assert_eq!(series.template.title, "일일 점검");
    assert_eq!(series.template.recurring_sequence, Some(1));
    assert_eq!(series.instances.len(), 4);
    assert_eq!(series.instances[0].title, "일일 점검 (2회차)");
    assert_eq!(series.instances[3].title, "일일 점검 (5회차)");
    assert_eq!(series.instances[3].work_date, Some(date(2025, 1, 5)));
    assert!(series
        .instances
        .iter()
        .all(|instance| instance.recurring_parent_id == Some(series.template.id)));
    assert!(series.instances.iter().all(|instance| {
        instance.category.as_deref() == Some("운영") && instance.priority == TaskPriority::Urgent
    }));
    assert!(!series.truncated);

    let again = service.extend_recurring(series.template.id).unwrap();
    assert!(again.instances.is_empty());
    let stored = service
        .repo()
        .list_recurring_instances(series.template.id)
        .unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(work_dates(&stored).len(), 4);
}

#[test]
fn indefinite_series_extends_in_capped_batches() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let config = EngineConfig {
        max_recurrence_instances: 10,
        ..EngineConfig::default()
    };
    let service = TaskService::with_config(repo, MemoryNotificationSink::new(), config);

    let mut draft = NewTask::new("스탠드업", "alice", "alice");
    draft.work_date = Some(date(2025, 3, 3));
    draft.recurrence = Some(RecurrenceRule::indefinite(RecurrenceKind::Weekdays));
    let series = service.create_recurring(draft).unwrap();
    assert_eq!(series.instances.len(), 9);
    assert!(series.truncated);

    let extended = service.extend_recurring(series.template.id).unwrap();
    assert_eq!(extended.instances.len(), 10);
    assert_eq!(extended.instances[0].recurring_sequence, Some(11));
    assert_eq!(extended.instances[0].title, "스탠드업 (11회차)");

    let stored = service
        .repo()
        .list_recurring_instances(series.template.id)
        .unwrap();
    assert_eq!(stored.len(), 19);
    assert_eq!(work_dates(&stored).len(), 19);
}

#[test]
fn weekly_template_moves_to_its_first_matching_day() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    // 2025-01-05 is a Sunday.
    let mut draft = NewTask::new("주간 회의", "alice", "alice");
    draft.work_date = Some(date(2025, 1, 5));
    draft.due_date = Some(date(2025, 1, 6));
    draft.recurrence = Some(
        RecurrenceRule::until(RecurrenceKind::Weekly, date(2025, 1, 19))
            .with_days(vec![Weekday::Mon, Weekday::Wed]),
    );
    let series = service.create_recurring(draft).unwrap();

    assert_eq!(series.template.work_date, Some(date(2025, 1, 6)));
    assert_eq!(series.template.due_date, Some(date(2025, 1, 7)));
    assert_eq!(series.instances.len(), 3);
    assert_eq!(series.instances[2].work_date, Some(date(2025, 1, 15)));
}

#[test]
fn delegated_series_spawns_a_confirmation_per_occurrence() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let mut draft = delegated("일일 보고");
    draft.work_date = Some(date(2025, 1, 1));
    draft.recurrence = Some(RecurrenceRule::until(RecurrenceKind::Daily, date(2025, 1, 3)));
    let series = service.create_recurring(draft).unwrap();

    assert_eq!(series.follow_ups_created, 3);
    assert_eq!(service.notifier().notices().len(), 3);
    let instance = &series.instances[0];
    assert_eq!(service.confirmations(instance.id).unwrap().len(), 1);
}

#[test]
fn invalid_rule_writes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let mut draft = NewTask::new("주간 회의", "alice", "alice");
    draft.work_date = Some(date(2025, 1, 6));
    draft.recurrence = Some(
        RecurrenceRule::until(RecurrenceKind::Weekly, date(2025, 2, 1)).with_days(vec![]),
    );
    let err = service.create_recurring(draft).unwrap_err();
    assert!(matches!(
        err,
        TaskServiceError::Recurrence(RecurrenceError::EmptyDaysOfWeek)
    ));

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM tasks;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn extending_a_plain_task_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let task = service
        .create_task(NewTask::new("단발성", "alice", "alice"))
        .unwrap()
        .task;
    let err = service.extend_recurring(task.id).unwrap_err();
    assert!(matches!(err, TaskServiceError::NotRecurring(id) if id == task.id));
}

#[test]
fn bulk_upload_reports_each_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let mut recurring = NewTask::new("월간 정산", "alice", "alice");
    recurring.work_date = Some(date(2025, 1, 31));
    recurring.recurrence = Some(RecurrenceRule::until(RecurrenceKind::Monthly, date(2025, 3, 31)));

    let report = service.bulk_upload(vec![
        NewTask::new("정상", "alice", "alice"),
        NewTask::new("   ", "alice", "alice"),
        delegated("위임"),
        recurring,
    ]);

    assert_eq!(report.created_count(), 3);
    assert_eq!(report.failed_count(), 1);
    let failed = report.rows[1].outcome.as_ref().unwrap_err();
    assert_eq!(failed.kind(), FailureKind::Validation);
    assert!(report.rows[2].outcome.as_ref().unwrap().follow_up_created);
    assert_eq!(report.rows[3].outcome.as_ref().unwrap().instance_count, 2);
}

#[test]
fn bulk_delete_reports_missing_ids_without_stopping() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let service = TaskService::new(repo, MemoryNotificationSink::new());

    let first = service.create_task(NewTask::new("A", "alice", "alice")).unwrap().task;
    let second = service.create_task(NewTask::new("B", "alice", "alice")).unwrap().task;

    let report = service.bulk_delete(&[first.id, 999, second.id]);
    assert_eq!(report.deleted, vec![first.id, second.id]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].task_id, 999);
    assert_eq!(report.failures[0].kind, FailureKind::NotFound);
}
