//! Domain model for the task lifecycle engine.
//!
//! # Responsibility
//! - Define canonical task records and the field-level patch vocabulary.
//! - Define recurrence rule declarations attached to template tasks.
//!
//! # Invariants
//! - Every persisted task is identified by a server-assigned `TaskId`.
//! - `status` follows `progress` except for explicitly chosen paused states.
//! - Storage uses snake_case names, the wire uses camelCase names.

pub mod field;
pub mod recurrence;
pub mod task;
