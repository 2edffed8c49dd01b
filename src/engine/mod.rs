// src/engine/mod.rs

//! Orchestration engine for workdag.
//!
//! This module ties together:
//! - the DAG scheduler (ready set, selection, cascading blocks)
//! - admission control and checkpoint gating
//! - task claims in the shared session store
//! - tiered recovery around each execution
//! - persistence of the run after every step
//!
//! [`runner`] is the async loop; [`control`] holds the out-of-band
//! operations (unblock, resolve, status) that act on persisted runs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dag::BlockReason;
use crate::types::TaskId;

pub mod cancel;
pub mod control;
pub mod runner;
pub mod summary;

pub use cancel::{CancelHandle, CancelToken};
pub use control::{resolve_checkpoint, run_status, unblock_task};
pub use runner::{Collaborators, Runner};
pub use summary::RunSummary;

/// Lifecycle state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Nothing left to run and nothing blocked.
    Succeeded,
    /// Nothing left to run; some tasks are blocked.
    Partial,
    BudgetExhausted,
    /// Suspended on an unresolved checkpoint.
    Paused { checkpoint_id: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running | RunStatus::Paused { .. })
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::BudgetExhausted => write!(f, "budget exhausted"),
            RunStatus::Paused { checkpoint_id } => {
                write!(f, "paused on checkpoint {checkpoint_id}")
            }
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one iteration of the run loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A task was executed (including all its recovery attempts).
    Executed {
        task_id: TaskId,
        success: bool,
        cost: f64,
    },
    /// A task was blocked without executing; dependents were cascaded.
    Blocked { task_id: TaskId, reason: BlockReason },
    /// The run is waiting on a checkpoint.
    Paused { checkpoint_id: String },
    /// The run reached a terminal status.
    Finished(RunStatus),
}
