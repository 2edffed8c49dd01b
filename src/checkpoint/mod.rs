// src/checkpoint/mod.rs

//! Human-approval checkpoints.
//!
//! A checkpoint is raised either by admission (COST/SCOPE/RISK triggers) or
//! by recovery escalation (HICCUP). It is resolved exactly once and never
//! changes afterwards.

pub mod surface;

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admission::{RiskAssessment, RiskFactor};
use crate::dag::Task;
use crate::errors::{Result, WorkdagError};
use crate::recovery::RecoveryAttempt;

pub use surface::{DecisionSurface, HumanDecision, NonInteractiveSurface, TerminalSurface};

/// Scores below this recommend "proceed" at an admission checkpoint.
const PROCEED_RECOMMENDATION_CEILING: f64 = 0.65;

pub const OPTION_PROCEED: &str = "proceed";
pub const OPTION_SKIP: &str = "skip";
pub const OPTION_PAUSE: &str = "pause";
pub const OPTION_RETRY: &str = "retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Cost,
    Scope,
    Risk,
    Hiccup,
}

impl fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointTrigger::Cost => write!(f, "COST"),
            CheckpointTrigger::Scope => write!(f, "SCOPE"),
            CheckpointTrigger::Risk => write!(f, "RISK"),
            CheckpointTrigger::Hiccup => write!(f, "HICCUP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointOption {
    pub label: String,
    pub description: String,
    pub is_recommended: bool,
}

impl CheckpointOption {
    fn new(label: &str, description: &str, is_recommended: bool) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            is_recommended,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub option: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// What a human was shown when asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CheckpointContext {
    Risk(RiskAssessment),
    Recovery(Vec<RecoveryAttempt>),
}

/// The scheduling meaning of a chosen option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDecision {
    Proceed,
    Skip,
    Pause,
    Retry,
}

impl CheckpointDecision {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            OPTION_PROCEED => Some(CheckpointDecision::Proceed),
            OPTION_SKIP => Some(CheckpointDecision::Skip),
            OPTION_PAUSE => Some(CheckpointDecision::Pause),
            OPTION_RETRY => Some(CheckpointDecision::Retry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub run_id: String,
    pub task_id: String,
    pub trigger: CheckpointTrigger,
    pub rationale: String,
    pub options: Vec<CheckpointOption>,
    pub context: CheckpointContext,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    resolution: Option<Resolution>,
}

impl Checkpoint {
    /// Checkpoint for a CHECKPOINT risk recommendation. The trigger names
    /// the factor contributing most to the score.
    pub fn for_admission(run_id: &str, task: &Task, risk: &RiskAssessment) -> Self {
        let trigger = match risk.dominant_factor() {
            Some(RiskFactor::Cost) => CheckpointTrigger::Cost,
            Some(RiskFactor::Scope) => CheckpointTrigger::Scope,
            _ => CheckpointTrigger::Risk,
        };
        let proceed_recommended = risk.score < PROCEED_RECOMMENDATION_CEILING;
        let options = vec![
            CheckpointOption::new(OPTION_PROCEED, "run the task now", proceed_recommended),
            CheckpointOption::new(
                OPTION_SKIP,
                "block the task and its dependents, continue with the rest",
                !proceed_recommended,
            ),
            CheckpointOption::new(
                OPTION_PAUSE,
                "stop the run here; resume after resolving",
                false,
            ),
        ];

        Self::new(
            run_id,
            &task.id,
            trigger,
            risk.rationale.clone(),
            options,
            CheckpointContext::Risk(risk.clone()),
        )
    }

    /// HICCUP checkpoint for a task whose recovery escalated.
    pub fn for_escalation(
        run_id: &str,
        task: &Task,
        rationale: String,
        attempts: Vec<RecoveryAttempt>,
    ) -> Self {
        let options = vec![
            CheckpointOption::new(
                OPTION_RETRY,
                "unblock the task so the next resume runs it again",
                false,
            ),
            CheckpointOption::new(OPTION_SKIP, "leave the task blocked", true),
        ];
        Self::new(
            run_id,
            &task.id,
            CheckpointTrigger::Hiccup,
            rationale,
            options,
            CheckpointContext::Recovery(attempts),
        )
    }

    fn new(
        run_id: &str,
        task_id: &str,
        trigger: CheckpointTrigger,
        rationale: String,
        options: Vec<CheckpointOption>,
        context: CheckpointContext,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            task_id: task_id.to_string(),
            trigger,
            rationale,
            options,
            context,
            created_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn has_option(&self, label: &str) -> bool {
        self.options.iter().any(|o| o.label == label)
    }

    pub fn recommended(&self) -> Option<&CheckpointOption> {
        self.options.iter().find(|o| o.is_recommended)
    }

    /// Record the chosen option. Returns `Ok(false)` for `pause`, which
    /// leaves the checkpoint pending.
    pub fn resolve(&mut self, option: &str, notes: Option<String>) -> Result<bool> {
        if self.is_resolved() {
            return Err(WorkdagError::CheckpointAlreadyResolved(
                self.checkpoint_id.clone(),
            ));
        }
        if !self.has_option(option) {
            return Err(WorkdagError::UnknownCheckpointOption {
                checkpoint: self.checkpoint_id.clone(),
                option: option.to_string(),
            });
        }
        if option == OPTION_PAUSE {
            return Ok(false);
        }
        self.resolution = Some(Resolution {
            option: option.to_string(),
            notes,
            resolved_at: Utc::now(),
        });
        Ok(true)
    }

    pub fn decision(&self) -> Option<CheckpointDecision> {
        self.resolution
            .as_ref()
            .and_then(|r| CheckpointDecision::from_label(&r.option))
    }

    /// Human-readable rendering for the decision surface and the CLI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "[{}] checkpoint {} for task '{}' (run {})",
            self.trigger, self.checkpoint_id, self.task_id, self.run_id
        );
        let _ = writeln!(out, "  {}", self.rationale);

        match &self.context {
            CheckpointContext::Risk(risk) => {
                for f in &risk.factors {
                    let _ = writeln!(
                        out,
                        "    {:<13} {:.2} x {:.2}  {}",
                        f.factor.to_string(),
                        f.value,
                        f.weight,
                        f.detail
                    );
                }
            }
            CheckpointContext::Recovery(attempts) => {
                for a in attempts {
                    let _ = writeln!(
                        out,
                        "    #{} {:<11} {:?} backoff {:.1}s  {}",
                        a.attempt_number,
                        a.tier.to_string(),
                        a.outcome,
                        a.backoff_seconds_used,
                        a.error_summary.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        for (i, o) in self.options.iter().enumerate() {
            let marker = if o.is_recommended { " (recommended)" } else { "" };
            let _ = writeln!(out, "  {}) {}{}: {}", i + 1, o.label, marker, o.description);
        }
        if let Some(r) = &self.resolution {
            let _ = writeln!(
                out,
                "  resolved: {} at {}{}",
                r.option,
                r.resolved_at.to_rfc3339(),
                r.notes
                    .as_deref()
                    .map(|n| format!(" ({n})"))
                    .unwrap_or_default()
            );
        }
        out
    }
}
