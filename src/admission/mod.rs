// src/admission/mod.rs

//! Risk-scored admission control.
//!
//! - [`risk`] scores a task on five weighted factors.
//! - [`controller`] runs the preflight sequence (budget, dependencies, risk)
//!   and applies the checkpoint-budget fallback.
//! - [`history`] is the outcome/decision ledger behind the precedent and
//!   confidence factors.

pub mod controller;
pub mod history;
pub mod risk;

pub use controller::{AdmissionController, CheckpointGate, PreflightIssue, PreflightResult};
pub use history::{HistoryEntry, TaskHistory};
pub use risk::{
    FactorScore, Recommendation, Reversibility, RiskAssessment, RiskConfig, RiskContext,
    RiskEngine, RiskFactor, RiskWeights, classify_reversibility, cost_factor,
};
