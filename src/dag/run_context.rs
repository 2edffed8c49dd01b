// src/dag/run_context.rs

//! Mutable per-run state, threaded explicitly through every call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// What the checkpoint-budget fallback did for a task once the run's
/// checkpoint ceiling was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoDecision {
    Approved,
    Blocked,
}

/// One silent auto-resolution. These are listed in every run summary so the
/// trade-off is never hidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoResolution {
    pub task_id: TaskId,
    pub score: f64,
    pub decision: AutoDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub budget: f64,
    #[serde(default)]
    pub running_cost: f64,
    #[serde(default)]
    pub completed: BTreeSet<TaskId>,
    #[serde(default)]
    pub blocked: BTreeSet<TaskId>,
    #[serde(default)]
    pub checkpoints_raised: u32,
    pub max_checkpoints: u32,
    #[serde(default)]
    pub auto_resolved: Vec<AutoResolution>,
    /// Tasks a human approved at a checkpoint while the run was paused;
    /// their next preflight skips checkpoint gating.
    #[serde(default)]
    pub pre_approved: BTreeSet<TaskId>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, budget: f64, max_checkpoints: u32) -> Self {
        Self {
            run_id: run_id.into(),
            budget,
            running_cost: 0.0,
            completed: BTreeSet::new(),
            blocked: BTreeSet::new(),
            checkpoints_raised: 0,
            max_checkpoints,
            auto_resolved: Vec::new(),
            pre_approved: BTreeSet::new(),
        }
    }

    pub fn remaining_budget(&self) -> f64 {
        self.budget - self.running_cost
    }

    pub fn budget_exhausted(&self) -> bool {
        self.running_cost >= self.budget
    }

    pub fn checkpoint_budget_available(&self) -> bool {
        self.checkpoints_raised < self.max_checkpoints
    }

    pub fn add_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.running_cost += cost;
        }
    }
}
