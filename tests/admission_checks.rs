// tests/admission_checks.rs

mod common;
use crate::common::context;

use globset::{Glob, GlobSetBuilder};
use proptest::prelude::*;
use workdag::admission::{
    AdmissionController, CheckpointGate, HistoryEntry, PreflightIssue, Recommendation,
    Reversibility, RiskConfig, RiskContext, RiskEngine, RiskFactor, TaskHistory,
    classify_reversibility, cost_factor,
};
use workdag::dag::{BlockReason, Task};

fn score_of(task: &Task, remaining: f64) -> f64 {
    let history = TaskHistory::default();
    RiskEngine::default()
        .score(
            task,
            &RiskContext {
                remaining_budget: remaining,
                history: &history,
            },
        )
        .score
}

#[test]
fn over_budget_task_fails_preflight_before_any_scoring() {
    let mut ctx = context("budget");
    ctx.budget = 25.0;
    let task = Task::new("expensive").with_cost(40.0);

    let result = AdmissionController::default().preflight(&task, &ctx, &TaskHistory::default());

    assert!(!result.passed);
    assert!(result.risk.is_none());
    assert_eq!(
        result.issue,
        Some(PreflightIssue::Budget {
            cost: 40.0,
            remaining: 25.0
        })
    );
    assert_eq!(result.issue.as_ref().map(PreflightIssue::kind), Some("budget"));
}

#[test]
fn budget_is_checked_before_dependencies() {
    let mut ctx = context("order");
    ctx.budget = 5.0;
    ctx.blocked.insert("upstream".to_string());
    let task = Task::new("t").with_cost(10.0).with_dependency("upstream");

    let result = AdmissionController::default().preflight(&task, &ctx, &TaskHistory::default());
    assert_eq!(result.issue.map(|i| i.kind()), Some("budget"));
}

#[test]
fn a_blocked_dependency_fails_preflight() {
    let mut ctx = context("deps");
    ctx.blocked.insert("schema".to_string());
    let task = Task::new("api").with_dependency("schema");

    let result = AdmissionController::default().preflight(&task, &ctx, &TaskHistory::default());

    assert!(!result.passed);
    assert!(result.risk.is_none());
    assert_eq!(
        result.block_reason(),
        Some(BlockReason::DependencyBlocked {
            upstream: "schema".to_string()
        })
    );
}

#[test]
fn cheap_reversible_work_proceeds_without_a_checkpoint() {
    let task = Task::new("fmt").with_description("format the code").with_cost(1.0);
    let result =
        AdmissionController::default().preflight(&task, &context("low"), &TaskHistory::default());

    assert!(result.passed);
    assert!(!result.requires_checkpoint);
    assert!(result.auto_approved);
    assert_eq!(
        result.risk.map(|r| r.recommendation),
        Some(Recommendation::Proceed)
    );
}

#[test]
fn expensive_irreversible_work_needs_a_checkpoint() {
    let task = Task::new("cleanup")
        .with_description("Drop the legacy tables")
        .with_cost(60.0);
    let result =
        AdmissionController::default().preflight(&task, &context("mid"), &TaskHistory::default());

    assert!(result.passed);
    assert!(result.requires_checkpoint);
    let risk = result.risk.unwrap();
    assert_eq!(risk.recommendation, Recommendation::Checkpoint);
    assert_eq!(risk.factor(RiskFactor::Reversibility), Some(1.0));
    assert_eq!(risk.factor(RiskFactor::Cost), Some(1.0));
    assert_eq!(risk.dominant_factor(), Some(RiskFactor::Cost));
    assert!(risk.rationale.contains("reversibility"), "{}", risk.rationale);
}

#[test]
fn approval_earlier_in_the_run_skips_the_checkpoint_but_not_the_budget() {
    let task = Task::new("cleanup")
        .with_description("Drop the legacy tables")
        .with_cost(60.0);
    let mut ctx = context("approved");
    ctx.pre_approved.insert("cleanup".to_string());
    let controller = AdmissionController::default();

    let result = controller.preflight(&task, &ctx, &TaskHistory::default());
    assert!(result.passed);
    assert!(!result.requires_checkpoint);
    assert!(result.auto_approved);

    ctx.running_cost = 50.0;
    let result = controller.preflight(&task, &ctx, &TaskHistory::default());
    assert!(!result.passed);
    assert_eq!(result.issue.map(|i| i.kind()), Some("budget"));
}

#[test]
fn wide_risky_work_on_core_paths_is_blocked() {
    let mut config = RiskConfig::default();
    let mut globs = GlobSetBuilder::new();
    globs.add(Glob::new("src/core/**").unwrap());
    config.core_paths = globs.build().unwrap();

    let files: Vec<String> = (0..20).map(|i| format!("src/core/mod_{i}.rs")).collect();
    let task = Task::new("rewrite")
        .with_description("migrate the storage engine")
        .with_cost(80.0)
        .with_files(files);

    let result =
        AdmissionController::new(config).preflight(&task, &context("high"), &TaskHistory::default());

    assert!(!result.passed);
    assert_eq!(result.issue.as_ref().map(PreflightIssue::kind), Some("risk"));
    assert!(matches!(
        result.block_reason(),
        Some(BlockReason::RiskTooHigh { score }) if score >= 0.8
    ));
}

#[test]
fn history_of_success_and_approval_lowers_the_score() {
    let task = Task::new("release-notes")
        .with_kind("docs")
        .with_description("write release notes")
        .with_cost(5.0);
    let engine = RiskEngine::default();
    let empty = TaskHistory::default();

    let mut good = TaskHistory::default();
    for _ in 0..4 {
        good.push(HistoryEntry::outcome(&task, true));
        good.push(HistoryEntry::decision(&task, true));
    }

    let cold = engine.score(
        &task,
        &RiskContext {
            remaining_budget: 100.0,
            history: &empty,
        },
    );
    let warm = engine.score(
        &task,
        &RiskContext {
            remaining_budget: 100.0,
            history: &good,
        },
    );

    assert_eq!(cold.factor(RiskFactor::Precedent), Some(0.6));
    assert_eq!(cold.factor(RiskFactor::Confidence), Some(0.55));
    assert_eq!(warm.factor(RiskFactor::Precedent), Some(0.0));
    assert_eq!(warm.factor(RiskFactor::Confidence), Some(0.0));
    assert!(warm.score < cold.score);
}

#[test]
fn reversibility_keywords() {
    assert_eq!(
        classify_reversibility("DELETE old snapshots"),
        Reversibility::Irreversible
    );
    assert_eq!(
        classify_reversibility("force-push the rewritten branch"),
        Reversibility::Irreversible
    );
    assert_eq!(
        classify_reversibility("deploy to staging"),
        Reversibility::ExternalEffect
    );
    assert_eq!(
        classify_reversibility("refactor the parser"),
        Reversibility::Reversible
    );
    assert_eq!(Reversibility::Irreversible.score(), 1.0);
    assert_eq!(Reversibility::ExternalEffect.score(), 0.7);
    assert_eq!(Reversibility::Reversible.score(), 0.2);
}

#[test]
fn factors_are_reported_heaviest_weight_first() {
    let history = TaskHistory::default();
    let risk = RiskEngine::default().score(
        &Task::new("x"),
        &RiskContext {
            remaining_budget: 10.0,
            history: &history,
        },
    );
    let order: Vec<RiskFactor> = risk.factors.iter().map(|f| f.factor).collect();
    assert_eq!(
        order,
        vec![
            RiskFactor::Cost,
            RiskFactor::Scope,
            RiskFactor::Reversibility,
            RiskFactor::Precedent,
            RiskFactor::Confidence,
        ]
    );
}

#[test]
fn exhausted_checkpoint_budget_resolves_by_score() {
    let controller = AdmissionController::default();
    let history = TaskHistory::default();
    let mut ctx = context("gate");
    let risky = controller.engine().score(
        &Task::new("t")
            .with_description("drop everything")
            .with_cost(60.0),
        &RiskContext {
            remaining_budget: 100.0,
            history: &history,
        },
    );

    assert_eq!(controller.gate_checkpoint(&risky, &ctx), CheckpointGate::Prompt);

    ctx.checkpoints_raised = ctx.max_checkpoints;
    assert_eq!(
        controller.gate_checkpoint(&risky, &ctx),
        CheckpointGate::AutoApprove
    );

    let mut dire = risky.clone();
    dire.score = 0.95;
    assert_eq!(controller.gate_checkpoint(&dire, &ctx), CheckpointGate::AutoBlock);
}

#[test]
fn cost_factor_saturates() {
    assert_eq!(cost_factor(0.0, 10.0), 0.0);
    assert_eq!(cost_factor(5.0, 0.0), 1.0);
    assert_eq!(cost_factor(60.0, 100.0), 1.0);
    assert!((cost_factor(30.0, 100.0) - 0.5).abs() < 1e-9);
}

proptest! {
    #[test]
    fn score_is_bounded_and_monotone_in_cost(
        low in 0.0f64..50.0,
        extra in 0.0f64..50.0,
        remaining in 1.0f64..200.0,
        files in 0usize..30,
    ) {
        let base = Task::new("p").with_files((0..files).map(|i| format!("f{i}")));
        let cheap = base.clone().with_cost(low);
        let pricey = base.with_cost(low + extra);

        let (a, b) = (score_of(&cheap, remaining), score_of(&pricey, remaining));
        prop_assert!((0.0..=1.0).contains(&a));
        prop_assert!((0.0..=1.0).contains(&b));
        prop_assert!(a <= b + 1e-12, "{a} > {b}");
    }

    #[test]
    fn score_is_monotone_in_scope(extra in 0usize..30, base in 0usize..30) {
        let narrow = Task::new("s").with_files((0..base).map(|i| format!("f{i}")));
        let wide = Task::new("s").with_files((0..base + extra).map(|i| format!("f{i}")));
        prop_assert!(score_of(&narrow, 100.0) <= score_of(&wide, 100.0) + 1e-12);
    }
}
