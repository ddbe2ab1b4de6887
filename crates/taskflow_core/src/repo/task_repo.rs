//! Task repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the durable task store boundary consumed by the lifecycle engine.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate the resulting task before SQL mutations.
//! - `update_task_fields` touches only the listed columns plus `updated_at`.
//! - A second follow-up for the same `(parent_task_id, assigned_to)` is
//!   rejected by a unique index and surfaces as `RepoError::Conflict`.
//! - Lock contention surfaces as `RepoError::Transient`, distinct from
//!   `RepoError::NotFound`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::field::{FieldMap, FieldValue, TaskField};
use crate::model::recurrence::RecurrenceRule;
use crate::model::task::{NewTask, Task, TaskId, TaskPriority, TaskStatus, TaskValidationError};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    category,
    status,
    progress,
    priority,
    assigned_to,
    created_by,
    follow_up_assignee,
    follow_up_memo,
    follow_up_type,
    is_follow_up_task,
    parent_task_id,
    work_date,
    due_date,
    recurrence_rule,
    recurring_parent_id,
    recurring_sequence,
    created_at,
    updated_at
FROM tasks";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for task persistence and lookup operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(TaskValidationError),
    Db(DbError),
    NotFound(TaskId),
    /// Uniqueness constraint rejected the write.
    Conflict(String),
    /// Busy/locked store or timeout; safe to retry later.
    Transient(String),
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

/// Coarse failure class used in batch reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Validation,
    NotFound,
    Conflict,
    Transient,
    Storage,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "task_not_found",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Storage => "storage",
        }
    }

    /// Whether the same request may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Storage)
    }
}

impl RepoError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Conflict(_) => FailureKind::Conflict,
            Self::Transient(_) => FailureKind::Transient,
            Self::Db(_) | Self::InvalidData(_) | Self::UninitializedConnection { .. } => {
                FailureKind::Storage
            }
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::Conflict(message) => write!(f, "task write conflict: {message}"),
            Self::Transient(message) => write!(f, "task store temporarily unavailable: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted task data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "task repository requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::Transient(detail)
                }
                ErrorCode::ConstraintViolation
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Self::Conflict(detail)
                }
                _ => {}
            }
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable task store consumed by the lifecycle engine.
pub trait TaskRepository {
    fn find_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    /// Looks up the confirmation task of `parent_task_id` assigned to `assignee`.
    fn find_follow_up(&self, parent_task_id: TaskId, assignee: &str) -> RepoResult<Option<Task>>;
    /// Lists every confirmation task spawned by `parent_task_id`.
    fn list_follow_ups(&self, parent_task_id: TaskId) -> RepoResult<Vec<Task>>;
    /// Lists materialized instances of a recurring template, by sequence.
    fn list_recurring_instances(&self, template_id: TaskId) -> RepoResult<Vec<Task>>;
    /// Persists a draft; the store assigns `id`, `created_at`, `updated_at`.
    fn insert_task(&self, task: &NewTask) -> RepoResult<Task>;
    /// Partially updates the named fields and returns the updated record.
    fn update_task_fields(&self, id: TaskId, fields: &FieldMap) -> RepoResult<Task>;
    fn delete_task(&self, id: TaskId) -> RepoResult<()>;
}

impl<R: TaskRepository + ?Sized> TaskRepository for &R {
    fn find_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        (**self).find_task(id)
    }

    fn find_follow_up(&self, parent_task_id: TaskId, assignee: &str) -> RepoResult<Option<Task>> {
        (**self).find_follow_up(parent_task_id, assignee)
    }

    fn list_follow_ups(&self, parent_task_id: TaskId) -> RepoResult<Vec<Task>> {
        (**self).list_follow_ups(parent_task_id)
    }

    fn list_recurring_instances(&self, template_id: TaskId) -> RepoResult<Vec<Task>> {
        (**self).list_recurring_instances(template_id)
    }

    fn insert_task(&self, task: &NewTask) -> RepoResult<Task> {
        (**self).insert_task(task)
    }

    fn update_task_fields(&self, id: TaskId, fields: &FieldMap) -> RepoResult<Task> {
        (**self).update_task_fields(id, fields)
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        (**self).delete_task(id)
    }
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }

    fn query_tasks(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn find_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        load_task(self.conn, id)
    }

    fn find_follow_up(&self, parent_task_id: TaskId, assignee: &str) -> RepoResult<Option<Task>> {
        let mut tasks = self.query_tasks(
            &format!(
                "{TASK_SELECT_SQL}
                 WHERE is_follow_up_task = 1
                   AND parent_task_id = ?
                   AND assigned_to = ?
                 LIMIT 1;"
            ),
            vec![
                Value::Integer(parent_task_id),
                Value::Text(assignee.trim().to_string()),
            ],
        )?;
        Ok(tasks.pop())
    }

    fn list_follow_ups(&self, parent_task_id: TaskId) -> RepoResult<Vec<Task>> {
        self.query_tasks(
            &format!(
                "{TASK_SELECT_SQL}
                 WHERE is_follow_up_task = 1
                   AND parent_task_id = ?
                 ORDER BY id ASC;"
            ),
            vec![Value::Integer(parent_task_id)],
        )
    }

    fn list_recurring_instances(&self, template_id: TaskId) -> RepoResult<Vec<Task>> {
        self.query_tasks(
            &format!(
                "{TASK_SELECT_SQL}
                 WHERE recurring_parent_id = ?
                 ORDER BY recurring_sequence ASC, id ASC;"
            ),
            vec![Value::Integer(template_id)],
        )
    }

    fn insert_task(&self, task: &NewTask) -> RepoResult<Task> {
        task.validate()?;
        let recurrence_json = task
            .recurrence
            .as_ref()
            .map(encode_recurrence)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO tasks (
                title,
                description,
                category,
                status,
                progress,
                priority,
                assigned_to,
                created_by,
                follow_up_assignee,
                follow_up_memo,
                follow_up_type,
                is_follow_up_task,
                parent_task_id,
                work_date,
                due_date,
                recurrence_rule,
                recurring_parent_id,
                recurring_sequence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18);",
            params![
                task.title.trim(),
                task.description.as_str(),
                task.category.as_deref(),
                task.status.as_str(),
                i64::from(task.progress),
                task.priority.as_str(),
                task.assigned_to.trim(),
                task.created_by.as_str(),
                task.follow_up_assignee.as_deref().map(str::trim),
                task.follow_up_memo.as_deref(),
                task.follow_up_type.as_deref(),
                bool_to_int(task.is_follow_up_task),
                task.parent_task_id,
                task.work_date,
                task.due_date,
                recurrence_json,
                task.recurring_parent_id,
                task.recurring_sequence,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("event=task_insert module=repo status=ok task_id={id}");
        load_task(self.conn, id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("inserted task {id} not found in read-back"))
        })
    }

    fn update_task_fields(&self, id: TaskId, fields: &FieldMap) -> RepoResult<Task> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut task = load_task(&tx, id)?.ok_or(RepoError::NotFound(id))?;
        if fields.is_empty() {
            return Ok(task);
        }

        task.apply_fields(fields)?;
        task.validate()?;

        let mut assignments = Vec::with_capacity(fields.len() + 1);
        let mut bind_values = Vec::with_capacity(fields.len() + 1);
        for (field, value) in fields {
            assignments.push(format!("{} = ?", field.column_name()));
            bind_values.push(column_value(*field, value));
        }
        assignments.push("updated_at = (strftime('%s', 'now') * 1000)".to_string());
        bind_values.push(Value::Integer(id));

        let changed = tx.execute(
            &format!("UPDATE tasks SET {} WHERE id = ?;", assignments.join(", ")),
            params_from_iter(bind_values),
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        let updated = load_task(&tx, id)?.ok_or(RepoError::NotFound(id))?;
        tx.commit()?;
        debug!(
            "event=task_update module=repo status=ok task_id={id} field_count={}",
            fields.len()
        );
        Ok(updated)
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        debug!("event=task_delete module=repo status=ok task_id={id}");
        Ok(())
    }
}

fn load_task(conn: &Connection, id: TaskId) -> RepoResult<Option<Task>> {
    conn.query_row(
        &format!("{TASK_SELECT_SQL} WHERE id = ?1;"),
        [id],
        |row| Ok(parse_task_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let status_text: String = row.get("status")?;
    let status = TaskStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in tasks.status"))
    })?;

    let priority_text: String = row.get("priority")?;
    let priority = TaskPriority::parse(&priority_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid priority `{priority_text}` in tasks.priority"
        ))
    })?;

    let progress_value: i64 = row.get("progress")?;
    let progress = u8::try_from(progress_value).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid progress `{progress_value}` in tasks.progress"
        ))
    })?;

    let is_follow_up_task = match row.get::<_, i64>("is_follow_up_task")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_follow_up_task value `{other}` in tasks.is_follow_up_task"
            )));
        }
    };

    let recurrence = match row.get::<_, Option<String>>("recurrence_rule")? {
        Some(json) => Some(decode_recurrence(&json)?),
        None => None,
    };

    let task = Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        category: row.get("category")?,
        status,
        progress,
        priority,
        assigned_to: row.get("assigned_to")?,
        created_by: row.get("created_by")?,
        follow_up_assignee: row.get("follow_up_assignee")?,
        follow_up_memo: row.get("follow_up_memo")?,
        follow_up_type: row.get("follow_up_type")?,
        is_follow_up_task,
        parent_task_id: row.get("parent_task_id")?,
        work_date: row.get("work_date")?,
        due_date: row.get("due_date")?,
        recurrence,
        recurring_parent_id: row.get("recurring_parent_id")?,
        recurring_sequence: row.get("recurring_sequence")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    task.validate()?;
    Ok(task)
}

fn column_value(field: TaskField, value: &FieldValue) -> Value {
    match value {
        // `description` is NOT NULL; clearing it stores an empty string.
        FieldValue::Null if field == TaskField::Description => Value::Text(String::new()),
        FieldValue::Null => Value::Null,
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Integer(integer) => Value::Integer(*integer),
        FieldValue::Date(date) => Value::Text(date.format("%Y-%m-%d").to_string()),
        FieldValue::Status(status) => Value::Text(status.as_str().to_string()),
        FieldValue::Priority(priority) => Value::Text(priority.as_str().to_string()),
    }
}

fn encode_recurrence(rule: &RecurrenceRule) -> RepoResult<String> {
    serde_json::to_string(rule)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode recurrence rule: {err}")))
}

fn decode_recurrence(json: &str) -> RepoResult<RecurrenceRule> {
    serde_json::from_str(json).map_err(|err| {
        RepoError::InvalidData(format!("invalid recurrence rule in tasks.recurrence_rule: {err}"))
    })
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
