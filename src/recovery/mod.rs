// src/recovery/mod.rs

//! Tiered recovery around a single task execution.
//!
//! ```text
//! TRANSIENT ──(budget spent)──> ALTERNATIVE ──(budget spent / analyzer says so)──> ESCALATE
//!     │                              │
//!  identical retry,            retry with the analyzer's hint
//!  exponential backoff
//! ```
//!
//! Fatal failures skip straight to ESCALATE. Escalation raises a HICCUP
//! checkpoint carrying the full attempt ledger.

pub mod analyzer;
pub mod backoff;
pub mod manager;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use analyzer::{Advice, AdviceAction, AdvisoryAnalyzer, CommandAnalyzer, EscalatingAnalyzer};
pub use backoff::BackoffPolicy;
pub use manager::{RecoveryManager, RecoveryOutcome, SpentCost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    Transient,
    Alternative,
    Escalate,
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryTier::Transient => write!(f, "TRANSIENT"),
            RecoveryTier::Alternative => write!(f, "ALTERNATIVE"),
            RecoveryTier::Escalate => write!(f, "ESCALATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    /// Closing ledger entry: the loop handed the task to a human.
    Escalated,
}

/// One entry of the append-only recovery ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempt_number: u32,
    pub tier: RecoveryTier,
    pub error_summary: Option<String>,
    pub backoff_seconds_used: f64,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryPolicy {
    /// Executions allowed in the TRANSIENT tier, including the first.
    pub transient_max: u32,
    /// Guided retries allowed in the ALTERNATIVE tier.
    pub alternative_max: u32,
    pub backoff: BackoffPolicy,
    pub analyzer_timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            transient_max: 3,
            alternative_max: 2,
            backoff: BackoffPolicy::default(),
            analyzer_timeout: Duration::from_secs(30),
        }
    }
}

impl RecoveryPolicy {
    /// Upper bound on executions of one task before it escalates.
    pub fn max_executions(&self) -> u32 {
        self.transient_max + self.alternative_max
    }
}
