// src/dag/scheduler_step.rs

//! Result type for scheduler state updates.

use crate::types::TaskId;

/// Structured result of folding one decision or outcome into the scheduler.
///
/// Useful for tests that drive the scheduler by hand and want to assert what
/// changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStep {
    /// Tasks that became `READY` as a result of this update.
    pub newly_ready: Vec<TaskId>,
    /// Tasks newly marked `BLOCKED`, including the task itself when it was
    /// the one blocked, followed by cascaded dependents.
    pub newly_blocked: Vec<TaskId>,
    /// Whether running cost has now reached the budget.
    pub budget_exhausted: bool,
}
