// src/exec/backend.rs

//! Pluggable work executor abstraction.
//!
//! The recovery manager talks to a `WorkExecutor` instead of spawning
//! processes itself. This makes it easy to swap in a scripted executor in
//! tests while keeping the production implementation in [`super::task_runner`].
//!
//! - [`ShellExecutor`](super::task_runner::ShellExecutor) is the default
//!   implementation used by `workdag`. It runs the task's `command` through
//!   `sh -c` and classifies the exit status.
//! - Tests provide their own `WorkExecutor` that, for example, fails a fixed
//!   number of times and records the hints it was given.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::dag::Task;
use crate::errors::Result;

/// How a failed execution should be treated by the recovery tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Likely to succeed if simply retried (timeouts, rate limits).
    Transient,
    /// Retrying the same thing will fail the same way.
    Systematic,
    /// Bypasses every retry tier.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Systematic => write!(f, "systematic"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub class: ErrorClass,
    pub message: String,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.class, self.message)
    }
}

/// What one execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    /// Actual cost incurred, success or not.
    pub cost: f64,
    pub error: Option<ExecutionFailure>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ExecutionReport {
    pub fn succeeded(cost: f64) -> Self {
        Self {
            success: true,
            cost,
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn failed(class: ErrorClass, message: impl Into<String>, cost: f64) -> Self {
        Self {
            success: false,
            cost,
            error: Some(ExecutionFailure {
                class,
                message: message.into(),
            }),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// The failure to feed into recovery. A report that claims failure
    /// without saying why is treated as systematic.
    pub fn failure(&self) -> Option<ExecutionFailure> {
        if self.success {
            return None;
        }
        Some(self.error.clone().unwrap_or_else(|| ExecutionFailure {
            class: ErrorClass::Systematic,
            message: "execution failed without an error report".to_string(),
        }))
    }
}

/// Per-attempt inputs handed to the executor alongside the task.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub run_id: String,
    /// 1-based across all tiers.
    pub attempt: u32,
    /// Guidance from the advisory analyzer on ALTERNATIVE retries.
    pub hint: Option<String>,
}

/// Trait abstracting how a task's work is actually performed.
///
/// An `Err` from `execute` means the executor itself broke (could not spawn,
/// lost its backend) and is treated as fatal. Ordinary work failures come
/// back as `Ok` reports with `success == false`.
pub trait WorkExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionReport>> + Send + 'a>>;
}
