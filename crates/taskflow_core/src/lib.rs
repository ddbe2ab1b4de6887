//! Task lifecycle and delegation engine.
//! This crate owns every task invariant; callers go through `service`.

pub mod config;
pub mod db;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use lifecycle::delegation::{
    confirmation_state, ConfirmationState, DelegationError, DelegationSpawner, SpawnOutcome,
};
pub use lifecycle::reconcile::{
    ChangeReconciler, CommitFailure, CommitSummary, CommittedTask, EditState, PendingEdit,
    ReconcileError,
};
pub use lifecycle::recurrence::{
    expand, expand_with_limit, resume_after, Expansion, Occurrence, RecurrenceError,
    MAX_RECURRENCE_INSTANCES,
};
pub use lifecycle::status::{
    apply_progress, apply_status_choice, derive_status, StatusChoice, StatusChoiceError,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::field::{FieldError, FieldMap, FieldValue, TaskField};
pub use model::recurrence::{RecurrenceKind, RecurrenceRule};
pub use model::task::{NewTask, Task, TaskId, TaskPriority, TaskStatus, TaskValidationError};
pub use notify::{
    DelegationNotice, LogNotificationSink, MemoryNotificationSink, NotificationSink, NotifyError,
};
pub use repo::task_repo::{
    FailureKind, RepoError, RepoResult, SqliteTaskRepository, TaskRepository,
};
pub use service::task_service::{TaskService, TaskServiceError};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
