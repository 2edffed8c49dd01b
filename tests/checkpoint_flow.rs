// tests/checkpoint_flow.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, TaskConfigBuilder};
use crate::common::{Harness, init_tracing, with_timeout};

use workdag::admission::{HistoryEntry, RiskEngine};
use workdag::checkpoint::{
    Checkpoint, CheckpointTrigger, DecisionSurface, NonInteractiveSurface, OPTION_PROCEED,
};
use workdag::config::ConfigFile;
use workdag::dag::{AutoDecision, BlockReason, Task};
use workdag::engine::{self, RunStatus};
use workdag::errors::WorkdagError;
use workdag::exec::{ErrorClass, ExecutionReport};
use workdag::store::StateStore;
use workdag::types::NonInteractiveDefault;

/// Irreversible and expensive: scores 0.645 with an empty history, which
/// needs a checkpoint but stays under the block threshold.
fn risky(description: &str) -> workdag::config::TaskConfig {
    TaskConfigBuilder::new(description).cost(60.0).build()
}

fn one_risky_task() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_task("cleanup", risky("Drop the legacy tables"))
        .with_task("report", TaskConfigBuilder::new("summarise").after("cleanup").build())
        .build()
}

#[tokio::test]
async fn approved_checkpoint_lets_the_task_run() {
    init_tracing();
    let cfg = one_risky_task();
    let h = Harness::new();

    let mut runner = h.start(&cfg, "cp-proceed").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.checkpoints_raised, 1);
    assert_eq!(h.surface.prompts(), 1);

    let shown = &h.surface.shown()[0];
    assert_eq!(shown.trigger, CheckpointTrigger::Cost);
    assert_eq!(shown.task_id, "cleanup");
    assert_eq!(
        shown.recommended().map(|o| o.label.as_str()),
        Some(OPTION_PROCEED)
    );

    let stored = h.store.load_checkpoint(&shown.checkpoint_id).unwrap();
    assert_eq!(stored.resolution().map(|r| r.option.as_str()), Some("proceed"));

    let history = h.store.load_history().unwrap();
    assert!(history.entries.iter().any(|e| matches!(
        e,
        HistoryEntry::Decision { task_id, approved: true, .. } if task_id == "cleanup"
    )));
    assert_eq!(history.success_rate("cleanup"), Some(1.0));
}

#[tokio::test]
async fn skipped_checkpoint_blocks_the_task_and_its_dependents() {
    init_tracing();
    let cfg = one_risky_task();
    let h = Harness::new();
    h.surface.answer_with("skip");

    let mut runner = h.start(&cfg, "cp-skip").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Partial);
    assert!(summary.is_blocked("cleanup"));
    assert!(summary.is_blocked("report"));
    assert_eq!(h.executor.calls().len(), 0);
    assert_eq!(h.store.load_history().unwrap().approval_rate("cleanup"), Some(0.0));
}

#[tokio::test]
async fn checkpoint_limit_falls_back_to_auto_resolution_and_reports_it() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .max_checkpoints(1)
        .with_task("alpha", risky("purge stale caches"))
        .with_task("beta", risky("truncate the audit log"))
        .build();
    let h = Harness::new();
    // Free executions keep the remaining budget, and so the scores, unchanged.
    h.executor.script("alpha", [ExecutionReport::succeeded(0.0)]);
    h.executor.script("beta", [ExecutionReport::succeeded(0.0)]);

    let mut runner = h.start(&cfg, "cp-limit").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(h.surface.prompts(), 1);
    assert_eq!(summary.checkpoints_raised, 1);
    assert_eq!(summary.auto_resolved.len(), 1);
    assert_eq!(summary.auto_resolved[0].task_id, "beta");
    assert_eq!(summary.auto_resolved[0].decision, AutoDecision::Approved);
    assert!(summary.to_string().contains("auto-resolved"));
    assert_eq!(h.executor.execution_order(), vec!["alpha", "beta"]);
}

#[tokio::test]
async fn pause_then_resolve_out_of_band_then_resume() {
    init_tracing();
    let cfg = one_risky_task();
    let h = Harness::new();
    h.surface.answer_with("pause");

    let mut runner = h.start(&cfg, "cp-pause").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();
    let checkpoint_id = match &summary.status {
        RunStatus::Paused { checkpoint_id } => checkpoint_id.clone(),
        other => panic!("expected a paused run, got {other:?}"),
    };
    assert_eq!(h.executor.calls().len(), 0);
    assert!(!h.store.load_checkpoint(&checkpoint_id).unwrap().is_resolved());
    drop(runner);

    // Still unresolved: resuming keeps the run paused.
    let mut runner = h.resume(&cfg, "cp-pause").unwrap();
    assert_eq!(runner.pending_checkpoint(), Some(checkpoint_id.as_str()));
    let summary = with_timeout(runner.run()).await.unwrap();
    assert!(matches!(summary.status, RunStatus::Paused { .. }));
    drop(runner);

    engine::resolve_checkpoint(&h.store, &checkpoint_id, "proceed", Some("ok".to_string()))
        .unwrap();

    let mut runner = h.resume(&cfg, "cp-pause").unwrap();
    assert_eq!(runner.pending_checkpoint(), None);
    let summary = with_timeout(runner.run()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.completed, vec!["cleanup", "report"]);
    // The approval given while paused is not asked for again.
    assert_eq!(h.surface.prompts(), 1);
    assert!(runner.context().pre_approved.is_empty());
}

#[tokio::test]
async fn skipping_a_paused_checkpoint_blocks_the_task_on_resume() {
    init_tracing();
    let cfg = one_risky_task();
    let h = Harness::new();
    h.surface.answer_with("pause");

    let mut runner = h.start(&cfg, "cp-pause-skip").unwrap();
    with_timeout(runner.run()).await.unwrap();
    let checkpoint_id = runner.pending_checkpoint().unwrap().to_string();
    drop(runner);

    engine::resolve_checkpoint(&h.store, &checkpoint_id, "skip", None).unwrap();
    let mut runner = h.resume(&cfg, "cp-pause-skip").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Partial);
    let cleanup = runner.scheduler().task("cleanup").unwrap();
    assert_eq!(
        cleanup.blocked_reason(),
        Some(&BlockReason::CheckpointSkipped { checkpoint_id })
    );
    assert!(summary.is_blocked("report"));
}

#[tokio::test]
async fn retrying_a_hiccup_unblocks_the_task_for_the_next_resume() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_task("flaky", TaskConfigBuilder::new("call the service").cost(1.0).build())
        .with_task("after", TaskConfigBuilder::new("use the result").after("flaky").build())
        .build();
    let h = Harness::new();
    h.executor.script(
        "flaky",
        [ExecutionReport::failed(ErrorClass::Fatal, "credentials revoked", 0.5)],
    );

    let mut runner = h.start(&cfg, "hiccup").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();
    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.running_cost, 0.5);
    drop(runner);

    let checkpoints = h.store.list_checkpoints().unwrap();
    assert_eq!(checkpoints.len(), 1);
    let hiccup = &checkpoints[0];
    assert_eq!(hiccup.trigger, CheckpointTrigger::Hiccup);
    assert!(hiccup.rationale.contains("credentials revoked"), "{}", hiccup.rationale);

    engine::resolve_checkpoint(&h.store, &hiccup.checkpoint_id, "retry", None).unwrap();
    let err = engine::resolve_checkpoint(&h.store, &hiccup.checkpoint_id, "skip", None)
        .unwrap_err();
    assert!(matches!(err, WorkdagError::CheckpointAlreadyResolved(_)));

    let status = engine::run_status(&h.store, "hiccup").unwrap();
    assert_eq!(status.status, RunStatus::Running);
    assert_eq!(status.unfinished, vec!["after", "flaky"]);

    let mut runner = h.resume(&cfg, "hiccup").unwrap();
    let summary = with_timeout(runner.run()).await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(h.executor.executions_of("flaky"), 2);
    assert_eq!(h.executor.executions_of("after"), 1);
}

#[test]
fn unknown_options_are_rejected() {
    let task = Task::new("t").with_description("delete the bucket").with_cost(60.0);
    let history = Default::default();
    let risk = RiskEngine::default().score(
        &task,
        &workdag::admission::RiskContext {
            remaining_budget: 100.0,
            history: &history,
        },
    );
    let mut checkpoint = Checkpoint::for_admission("r", &task, &risk);

    let err = checkpoint.resolve("retry", None).unwrap_err();
    assert!(matches!(err, WorkdagError::UnknownCheckpointOption { .. }));
    assert!(!checkpoint.resolve("pause", None).unwrap());
    assert!(!checkpoint.is_resolved());
    assert!(checkpoint.resolve("skip", None).unwrap());
    assert!(checkpoint.render().contains("skip"));
}

#[test]
fn non_interactive_surface_answers_with_the_configured_default() {
    let task = Task::new("t").with_description("delete the bucket").with_cost(60.0);
    let history = Default::default();
    let risk = RiskEngine::default().score(
        &task,
        &workdag::admission::RiskContext {
            remaining_budget: 100.0,
            history: &history,
        },
    );
    let admission = Checkpoint::for_admission("r", &task, &risk);
    let hiccup = Checkpoint::for_escalation("r", &task, "gave up".to_string(), Vec::new());

    let pause = NonInteractiveSurface::new(NonInteractiveDefault::Pause);
    assert_eq!(pause.decide(&admission).unwrap().option, "pause");
    // HICCUP checkpoints offer no pause; the recommended option is used.
    assert_eq!(pause.decide(&hiccup).unwrap().option, "skip");

    let proceed = NonInteractiveSurface::new(NonInteractiveDefault::Proceed);
    assert_eq!(proceed.decide(&admission).unwrap().option, "proceed");
}
