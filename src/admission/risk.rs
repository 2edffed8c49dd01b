// src/admission/risk.rs

//! Weighted risk scoring.
//!
//! Five factors, each in `0.0..=1.0`, combined by configurable weights that
//! sum to 1.0:
//!
//! | factor        | default weight | source                                  |
//! |---------------|----------------|-----------------------------------------|
//! | cost          | 0.30           | estimated cost vs remaining budget      |
//! | scope         | 0.25           | file count + core-path matches          |
//! | reversibility | 0.20           | keyword classification of description   |
//! | precedent     | 0.15           | failure rate of similar past tasks      |
//! | confidence    | 0.10           | rejection rate of similar checkpoints   |
//!
//! Unknown history is treated as somewhat risky, never as safe.

use std::fmt;
use std::sync::LazyLock;

use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::admission::history::TaskHistory;
use crate::dag::Task;

/// Cost saturates once a task would consume this share of what is left.
const COST_SATURATION_SHARE: f64 = 0.6;

static IRREVERSIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(delete[sd]?|deleting|drop(s|ped)?|purge[sd]?|destroy(s|ed)?|truncate[sd]?|wipe[sd]?|irreversibl[ey]|force[- ]push(es|ed)?|rm\s+-rf|migrat(e|es|ed|ion|ions))\b",
    )
    .expect("irreversible keyword pattern is valid")
});

static EXTERNAL_EFFECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(deploy(s|ed)?|publish(es|ed)?|release[sd]?|send(s)?|email(s|ed)?|notif(y|ies|ied)|webhooks?|upload(s|ed)?|push(es|ed)?|charge[sd]?|payments?)\b",
    )
    .expect("external-effect keyword pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub cost: f64,
    pub scope: f64,
    pub reversibility: f64,
    pub precedent: f64,
    pub confidence: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            cost: 0.30,
            scope: 0.25,
            reversibility: 0.20,
            precedent: 0.15,
            confidence: 0.10,
        }
    }
}

impl RiskWeights {
    pub fn weight_of(&self, factor: RiskFactor) -> f64 {
        match factor {
            RiskFactor::Cost => self.cost,
            RiskFactor::Scope => self.scope,
            RiskFactor::Reversibility => self.reversibility,
            RiskFactor::Precedent => self.precedent,
            RiskFactor::Confidence => self.confidence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    pub checkpoint_threshold: f64,
    pub block_threshold: f64,
    pub core_paths: GlobSet,
    pub scope_saturation: u32,
    pub core_path_penalty: f64,
    /// Precedent factor when no similar task has run before.
    pub default_precedent: f64,
    /// Confidence factor when no similar checkpoint was ever decided.
    pub default_confidence: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            checkpoint_threshold: 0.5,
            block_threshold: 0.8,
            core_paths: GlobSet::empty(),
            scope_saturation: 20,
            core_path_penalty: 0.3,
            default_precedent: 0.6,
            default_confidence: 0.55,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Cost,
    Scope,
    Reversibility,
    Precedent,
    Confidence,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; 5] = [
        RiskFactor::Cost,
        RiskFactor::Scope,
        RiskFactor::Reversibility,
        RiskFactor::Precedent,
        RiskFactor::Confidence,
    ];
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskFactor::Cost => "cost",
            RiskFactor::Scope => "scope",
            RiskFactor::Reversibility => "reversibility",
            RiskFactor::Precedent => "precedent",
            RiskFactor::Confidence => "confidence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    Irreversible,
    ExternalEffect,
    Reversible,
}

impl Reversibility {
    pub fn score(self) -> f64 {
        match self {
            Reversibility::Irreversible => 1.0,
            Reversibility::ExternalEffect => 0.7,
            Reversibility::Reversible => 0.2,
        }
    }
}

/// Classify a task description by its most dangerous keyword.
pub fn classify_reversibility(description: &str) -> Reversibility {
    if IRREVERSIBLE.is_match(description) {
        Reversibility::Irreversible
    } else if EXTERNAL_EFFECT.is_match(description) {
        Reversibility::ExternalEffect
    } else {
        Reversibility::Reversible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Proceed,
    Checkpoint,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub factor: RiskFactor,
    pub value: f64,
    pub weight: f64,
    pub detail: String,
}

impl FactorScore {
    pub fn weighted(&self) -> f64 {
        self.value * self.weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    /// Factor scores, heaviest weight first.
    pub factors: Vec<FactorScore>,
    pub recommendation: Recommendation,
    pub rationale: String,
}

impl RiskAssessment {
    pub fn factor(&self, factor: RiskFactor) -> Option<f64> {
        self.factors
            .iter()
            .find(|f| f.factor == factor)
            .map(|f| f.value)
    }

    /// The factor contributing most to the weighted score.
    pub fn dominant_factor(&self) -> Option<RiskFactor> {
        self.factors
            .iter()
            .max_by(|a, b| a.weighted().total_cmp(&b.weighted()))
            .map(|f| f.factor)
    }
}

/// Inputs to a score that are not part of the task itself.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext<'a> {
    pub remaining_budget: f64,
    pub history: &'a TaskHistory,
}

#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn score(&self, task: &Task, ctx: &RiskContext<'_>) -> RiskAssessment {
        let mut factors: Vec<FactorScore> = RiskFactor::ALL
            .iter()
            .map(|&factor| {
                let (value, detail) = self.factor_value(factor, task, ctx);
                FactorScore {
                    factor,
                    value: value.clamp(0.0, 1.0),
                    weight: self.config.weights.weight_of(factor),
                    detail,
                }
            })
            .collect();
        // Stable: equal weights keep declaration order.
        factors.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let score = factors
            .iter()
            .map(FactorScore::weighted)
            .sum::<f64>()
            .clamp(0.0, 1.0);
        let recommendation = self.recommend(score);

        let elevated: Vec<String> = factors
            .iter()
            .filter(|f| f.value > 0.5)
            .map(|f| format!("{} {:.2} ({})", f.factor, f.value, f.detail))
            .collect();
        let rationale = if elevated.is_empty() {
            format!("score {score:.2}: no elevated risk factors")
        } else {
            format!("score {score:.2}: {}", elevated.join("; "))
        };

        RiskAssessment {
            score,
            factors,
            recommendation,
            rationale,
        }
    }

    pub fn recommend(&self, score: f64) -> Recommendation {
        if score >= self.config.block_threshold {
            Recommendation::Block
        } else if score >= self.config.checkpoint_threshold {
            Recommendation::Checkpoint
        } else {
            Recommendation::Proceed
        }
    }

    fn factor_value(&self, factor: RiskFactor, task: &Task, ctx: &RiskContext<'_>) -> (f64, String) {
        match factor {
            RiskFactor::Cost => {
                let value = cost_factor(task.estimated_cost, ctx.remaining_budget);
                (
                    value,
                    format!(
                        "estimated {:.2} of {:.2} remaining",
                        task.estimated_cost, ctx.remaining_budget
                    ),
                )
            }
            RiskFactor::Scope => {
                let count = task.files.len();
                let base = (count as f64 / f64::from(self.config.scope_saturation)).min(1.0);
                let core_hits = task
                    .files
                    .iter()
                    .filter(|f| self.config.core_paths.is_match(f.as_str()))
                    .count();
                let penalty = if core_hits > 0 {
                    self.config.core_path_penalty
                } else {
                    0.0
                };
                (
                    (base + penalty).min(1.0),
                    format!("{count} files, {core_hits} on core paths"),
                )
            }
            RiskFactor::Reversibility => {
                let class = classify_reversibility(&task.description);
                let detail = match class {
                    Reversibility::Irreversible => "irreversible operation",
                    Reversibility::ExternalEffect => "external side effects",
                    Reversibility::Reversible => "reversible",
                };
                (class.score(), detail.to_string())
            }
            RiskFactor::Precedent => match ctx.history.success_rate(task.similarity_key()) {
                Some(rate) => (1.0 - rate, format!("{:.0}% of similar tasks succeeded", rate * 100.0)),
                None => (self.config.default_precedent, "no similar past tasks".to_string()),
            },
            RiskFactor::Confidence => match ctx.history.approval_rate(task.similarity_key()) {
                Some(rate) => (
                    1.0 - rate,
                    format!("{:.0}% of similar checkpoints approved", rate * 100.0),
                ),
                None => (
                    self.config.default_confidence,
                    "no past decisions on similar tasks".to_string(),
                ),
            },
        }
    }
}

/// `min(1, cost / remaining / 0.6)`; nothing left means any positive cost
/// saturates.
pub fn cost_factor(estimated_cost: f64, remaining_budget: f64) -> f64 {
    if estimated_cost <= 0.0 {
        return 0.0;
    }
    if remaining_budget <= 0.0 {
        return 1.0;
    }
    (estimated_cost / remaining_budget / COST_SATURATION_SHARE).min(1.0)
}
