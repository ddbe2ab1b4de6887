//! Task lifecycle rules.
//!
//! # Responsibility
//! - Derive task status from progress and normalize explicit status choices.
//! - Expand recurrence rules into dated occurrences.
//! - Spawn deduplicated confirmation tasks for delegated work.
//! - Queue and reconcile partial field edits.
//!
//! Everything here is storage-agnostic and talks to persistence only through
//! `repo::task_repo::TaskRepository`.

pub mod delegation;
pub mod reconcile;
pub mod recurrence;
pub mod status;
