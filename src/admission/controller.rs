// src/admission/controller.rs

//! Preflight admission checks run before a task is claimed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::admission::history::TaskHistory;
use crate::admission::risk::{Recommendation, RiskAssessment, RiskConfig, RiskContext, RiskEngine};
use crate::dag::{BlockReason, RunContext, Task};

/// The first check a task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreflightIssue {
    Budget { cost: f64, remaining: f64 },
    Dependency { dependency: String },
    Risk { score: f64 },
}

impl PreflightIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            PreflightIssue::Budget { .. } => "budget",
            PreflightIssue::Dependency { .. } => "dependency",
            PreflightIssue::Risk { .. } => "risk",
        }
    }

    pub fn block_reason(&self) -> BlockReason {
        match self {
            PreflightIssue::Budget { cost, remaining } => BlockReason::Budget {
                cost: *cost,
                remaining: *remaining,
            },
            PreflightIssue::Dependency { dependency } => BlockReason::DependencyBlocked {
                upstream: dependency.clone(),
            },
            PreflightIssue::Risk { score } => BlockReason::RiskTooHigh { score: *score },
        }
    }
}

impl fmt::Display for PreflightIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightIssue::Budget { cost, remaining } => write!(
                f,
                "budget: estimated cost {cost:.2} exceeds remaining {remaining:.2}"
            ),
            PreflightIssue::Dependency { dependency } => {
                write!(f, "dependency: '{dependency}' is blocked")
            }
            PreflightIssue::Risk { score } => write!(f, "risk: score {score:.2} too high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreflightResult {
    pub passed: bool,
    pub requires_checkpoint: bool,
    /// Passed without needing a human: low risk or approved earlier.
    pub auto_approved: bool,
    /// `None` when a hard check short-circuited before scoring.
    pub risk: Option<RiskAssessment>,
    pub issue: Option<PreflightIssue>,
}

impl PreflightResult {
    fn failed(issue: PreflightIssue, risk: Option<RiskAssessment>) -> Self {
        Self {
            passed: false,
            requires_checkpoint: false,
            auto_approved: false,
            risk,
            issue: Some(issue),
        }
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        self.issue.as_ref().map(PreflightIssue::block_reason)
    }
}

/// What to do with a CHECKPOINT recommendation given the run's checkpoint
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointGate {
    Prompt,
    AutoApprove,
    AutoBlock,
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionController {
    engine: RiskEngine,
}

impl AdmissionController {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            engine: RiskEngine::new(config),
        }
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    /// Budget, then dependencies, then risk. The first two are hard
    /// failures and skip scoring entirely.
    pub fn preflight(
        &self,
        task: &Task,
        ctx: &RunContext,
        history: &TaskHistory,
    ) -> PreflightResult {
        let remaining = ctx.remaining_budget();
        if task.estimated_cost > remaining {
            debug!(task = %task.id, cost = task.estimated_cost, remaining, "preflight: over budget");
            return PreflightResult::failed(
                PreflightIssue::Budget {
                    cost: task.estimated_cost,
                    remaining,
                },
                None,
            );
        }

        if let Some(dep) = task.dependencies.iter().find(|d| ctx.blocked.contains(*d)) {
            debug!(task = %task.id, dependency = %dep, "preflight: dependency blocked");
            return PreflightResult::failed(
                PreflightIssue::Dependency {
                    dependency: dep.clone(),
                },
                None,
            );
        }

        let risk = self.engine.score(
            task,
            &RiskContext {
                remaining_budget: remaining,
                history,
            },
        );
        info!(
            task = %task.id,
            score = risk.score,
            recommendation = ?risk.recommendation,
            "risk assessed"
        );

        match risk.recommendation {
            Recommendation::Block => {
                let score = risk.score;
                PreflightResult::failed(PreflightIssue::Risk { score }, Some(risk))
            }
            Recommendation::Checkpoint if !ctx.pre_approved.contains(&task.id) => PreflightResult {
                passed: true,
                requires_checkpoint: true,
                auto_approved: false,
                risk: Some(risk),
                issue: None,
            },
            Recommendation::Checkpoint | Recommendation::Proceed => PreflightResult {
                passed: true,
                requires_checkpoint: false,
                auto_approved: true,
                risk: Some(risk),
                issue: None,
            },
        }
    }

    /// Once the run has raised its maximum number of checkpoints, further
    /// ones are resolved by score instead of prompting.
    pub fn gate_checkpoint(&self, risk: &RiskAssessment, ctx: &RunContext) -> CheckpointGate {
        if ctx.checkpoint_budget_available() {
            CheckpointGate::Prompt
        } else if risk.score < self.engine.config().block_threshold {
            CheckpointGate::AutoApprove
        } else {
            CheckpointGate::AutoBlock
        }
    }
}
