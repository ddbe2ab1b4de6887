//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls and lifecycle rules into use-case level APIs.
//! - Keep CLI and other callers decoupled from storage details.

pub mod task_service;
