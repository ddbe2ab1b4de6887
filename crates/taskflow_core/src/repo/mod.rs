//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the task store contract the lifecycle engine depends on.
//! - Isolate SQLite query details from lifecycle and service orchestration.
//!
//! # Invariants
//! - Repository writes must enforce `Task::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`,
//!   `Transient`) in addition to DB transport errors.

pub mod task_repo;
