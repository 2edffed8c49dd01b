// src/exec/mod.rs

//! Work execution layer.
//!
//! This module is responsible for actually performing a task's work and
//! reporting success, cost and a classified error back to the recovery
//! manager.
//!
//! - [`backend`] provides the `WorkExecutor` trait and the report types.
//! - [`task_runner`] provides `ShellExecutor`, the production executor,
//!   which tests replace with a scripted implementation.

pub mod backend;
pub mod task_runner;

pub use backend::{
    ErrorClass, ExecutionContext, ExecutionFailure, ExecutionReport, WorkExecutor,
};
pub use task_runner::{ShellExecutor, classify_exit};
