// src/dag/task_info.rs

//! Task records and their stage FSM.
//!
//! ```text
//! BACKLOG -> READY -> IN_PROGRESS -> DONE
//!    |         |          |
//!    +---------+----------+-------> BLOCKED -> (requeue) -> BACKLOG
//! ```
//!
//! `IN_PROGRESS -> READY` exists only for cancellation and crash recovery.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::model::TaskConfig;
use crate::errors::{Result, WorkdagError};
use crate::types::{Priority, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Backlog,
    Ready,
    InProgress,
    Done,
    Blocked,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Backlog => write!(f, "BACKLOG"),
            Stage::Ready => write!(f, "READY"),
            Stage::InProgress => write!(f, "IN_PROGRESS"),
            Stage::Done => write!(f, "DONE"),
            Stage::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Why a task ended up `BLOCKED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// Estimated cost exceeded what was left of the run budget.
    Budget { cost: f64, remaining: f64 },
    /// Preflight found a dependency in the blocked set.
    DependencyBlocked { upstream: TaskId },
    /// Cascaded from a blocked upstream task.
    Transitive { upstream: TaskId },
    /// Risk score at or above the block threshold.
    RiskTooHigh { score: f64 },
    /// A human (or the non-interactive default) chose to skip.
    CheckpointSkipped { checkpoint_id: String },
    /// Another live session holds the task's claim.
    LockedElsewhere { holder: String, age_secs: i64 },
    /// Recovery exhausted its tiers and raised a HICCUP checkpoint.
    Escalated { checkpoint_id: String },
}

impl BlockReason {
    /// The upstream task this block was inherited from, if any.
    pub fn upstream(&self) -> Option<&str> {
        match self {
            BlockReason::DependencyBlocked { upstream } | BlockReason::Transitive { upstream } => {
                Some(upstream)
            }
            _ => None,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Budget { cost, remaining } => write!(
                f,
                "budget: estimated cost {cost:.2} exceeds remaining budget {remaining:.2}"
            ),
            BlockReason::DependencyBlocked { upstream } => {
                write!(f, "dependency '{upstream}' is blocked")
            }
            BlockReason::Transitive { upstream } => {
                write!(f, "transitive block: upstream task '{upstream}' is blocked")
            }
            BlockReason::RiskTooHigh { score } => {
                write!(f, "risk score {score:.2} at or above block threshold")
            }
            BlockReason::CheckpointSkipped { checkpoint_id } => {
                write!(f, "skipped at checkpoint {checkpoint_id}")
            }
            BlockReason::LockedElsewhere { holder, age_secs } => {
                write!(f, "locked elsewhere by '{holder}' ({age_secs}s old)")
            }
            BlockReason::Escalated { checkpoint_id } => {
                write!(f, "escalated to human at checkpoint {checkpoint_id}")
            }
        }
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    pub estimated_cost: f64,
    /// Label used to find similar past tasks.
    #[serde(default)]
    pub kind: Option<String>,
    /// Resources the task touches.
    #[serde(default)]
    pub files: Vec<String>,
    stage: Stage,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    blocked_reason: Option<BlockReason>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            command: None,
            priority: Priority::default(),
            dependencies: BTreeSet::new(),
            estimated_cost: 0.0,
            kind: None,
            files: Vec::new(),
            stage: Stage::Backlog,
            retry_count: 0,
            blocked_reason: None,
        }
    }

    pub fn from_config(id: TaskId, cfg: &TaskConfig) -> Self {
        let mut task = Task::new(id);
        task.description = cfg.description.clone();
        task.command = cfg.command.clone();
        task.priority = cfg.priority;
        task.dependencies = cfg.after.iter().cloned().collect();
        task.estimated_cost = cfg.estimated_cost;
        task.kind = cfg.kind.clone();
        task.files = cfg.files.clone();
        task
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_dependency(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn blocked_reason(&self) -> Option<&BlockReason> {
        self.blocked_reason.as_ref()
    }

    /// Key under which similar tasks share history: the `kind` label when
    /// present, otherwise the task id itself.
    pub fn similarity_key(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.id)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, Stage::Done | Stage::Blocked)
    }

    /// `BACKLOG -> READY`. Callers guarantee every dependency is `DONE`.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(&[Stage::Backlog], Stage::Ready)
    }

    /// `READY -> IN_PROGRESS`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[Stage::Ready], Stage::InProgress)
    }

    /// `IN_PROGRESS -> DONE`.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(&[Stage::InProgress], Stage::Done)
    }

    /// Any non-terminal stage `-> BLOCKED`.
    pub fn block(&mut self, reason: BlockReason) -> Result<()> {
        self.transition(
            &[Stage::Backlog, Stage::Ready, Stage::InProgress],
            Stage::Blocked,
        )?;
        self.blocked_reason = Some(reason);
        Ok(())
    }

    /// Explicit requeue: `BLOCKED -> BACKLOG`.
    pub fn requeue(&mut self) -> Result<()> {
        self.transition(&[Stage::Blocked], Stage::Backlog)?;
        self.blocked_reason = None;
        Ok(())
    }

    /// `IN_PROGRESS -> READY` after cancellation or a crash mid-execution.
    pub fn interrupt(&mut self) -> Result<()> {
        self.transition(&[Stage::InProgress], Stage::Ready)
    }

    pub(crate) fn set_retry_count(&mut self, retries: u32) {
        self.retry_count = retries;
    }

    fn transition(&mut self, allowed_from: &[Stage], to: Stage) -> Result<()> {
        if !allowed_from.contains(&self.stage) {
            return Err(WorkdagError::InvalidTransition {
                task: self.id.clone(),
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }
        self.stage = to;
        Ok(())
    }
}
