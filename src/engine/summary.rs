// src/engine/summary.rs

use std::fmt;

use crate::dag::{AutoDecision, AutoResolution, RunContext, Stage, Task};
use crate::engine::RunStatus;
use crate::types::TaskId;

/// End-of-run report. Auto-resolved checkpoints are always listed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub completed: Vec<TaskId>,
    /// Blocked tasks with their reason.
    pub blocked: Vec<(TaskId, String)>,
    /// Tasks that never reached DONE or BLOCKED.
    pub unfinished: Vec<TaskId>,
    pub running_cost: f64,
    pub budget: f64,
    pub checkpoints_raised: u32,
    pub auto_resolved: Vec<AutoResolution>,
}

impl RunSummary {
    pub fn from_parts<'a>(
        status: RunStatus,
        tasks: impl IntoIterator<Item = &'a Task>,
        ctx: &RunContext,
    ) -> Self {
        let mut completed = Vec::new();
        let mut blocked = Vec::new();
        let mut unfinished = Vec::new();
        for task in tasks {
            match task.stage() {
                Stage::Done => completed.push(task.id.clone()),
                Stage::Blocked => blocked.push((
                    task.id.clone(),
                    task.blocked_reason()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                )),
                Stage::Backlog | Stage::Ready | Stage::InProgress => {
                    unfinished.push(task.id.clone())
                }
            }
        }
        completed.sort();
        blocked.sort();
        unfinished.sort();

        Self {
            run_id: ctx.run_id.clone(),
            status,
            completed,
            blocked,
            unfinished,
            running_cost: ctx.running_cost,
            budget: ctx.budget,
            checkpoints_raised: ctx.checkpoints_raised,
            auto_resolved: ctx.auto_resolved.clone(),
        }
    }

    pub fn is_blocked(&self, task_id: &str) -> bool {
        self.blocked.iter().any(|(id, _)| id == task_id)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}: {}", self.run_id, self.status)?;
        writeln!(
            f,
            "  cost {:.2} / {:.2}, checkpoints raised {}",
            self.running_cost, self.budget, self.checkpoints_raised
        )?;
        if !self.completed.is_empty() {
            writeln!(f, "  done: {}", self.completed.join(", "))?;
        }
        for (id, reason) in &self.blocked {
            writeln!(f, "  blocked: {id} ({reason})")?;
        }
        if !self.unfinished.is_empty() {
            writeln!(f, "  not run: {}", self.unfinished.join(", "))?;
        }
        if !self.auto_resolved.is_empty() {
            writeln!(f, "  auto-resolved checkpoints (checkpoint limit reached):")?;
            for r in &self.auto_resolved {
                let decision = match r.decision {
                    AutoDecision::Approved => "approved",
                    AutoDecision::Blocked => "blocked",
                };
                writeln!(f, "    {} score {:.2} -> {}", r.task_id, r.score, decision)?;
            }
        }
        Ok(())
    }
}
