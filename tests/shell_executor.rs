// tests/shell_executor.rs
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout};

use std::time::Duration;

use workdag::dag::Task;
use workdag::exec::{
    ErrorClass, ExecutionContext, ExecutionReport, ShellExecutor, WorkExecutor, classify_exit,
};

fn shell_task(id: &str, command: &str) -> Task {
    let mut task = Task::new(id).with_cost(2.0);
    task.command = Some(command.to_string());
    task
}

fn attempt(n: u32) -> ExecutionContext {
    ExecutionContext {
        run_id: "shell-run".to_string(),
        attempt: n,
        hint: None,
    }
}

async fn run(task: &Task, ctx: &ExecutionContext, timeout: Duration) -> ExecutionReport {
    let executor = ShellExecutor::new(timeout);
    with_timeout(executor.execute(task, ctx)).await.unwrap()
}

fn failure_class(report: &ExecutionReport) -> ErrorClass {
    report.failure().map(|f| f.class).unwrap()
}

#[test]
fn exit_codes_map_to_error_classes() {
    assert_eq!(classify_exit(Some(1)), ErrorClass::Systematic);
    assert_eq!(classify_exit(Some(2)), ErrorClass::Systematic);
    assert_eq!(classify_exit(Some(75)), ErrorClass::Transient);
    assert_eq!(classify_exit(Some(124)), ErrorClass::Transient);
    assert_eq!(classify_exit(None), ErrorClass::Transient);
    assert_eq!(classify_exit(Some(126)), ErrorClass::Fatal);
    assert_eq!(classify_exit(Some(127)), ErrorClass::Fatal);
}

#[tokio::test]
async fn stdout_reports_cost_and_artifacts() {
    init_tracing();
    let task = shell_task(
        "package",
        "echo building; echo WORKDAG_COST=1.5; echo WORKDAG_COST=0.25; echo WORKDAG_ARTIFACT=dist/app.tar",
    );

    let report = run(&task, &attempt(1), Duration::from_secs(5)).await;

    assert!(report.success);
    assert_eq!(report.cost, 1.75);
    assert_eq!(report.artifacts, vec!["dist/app.tar"]);
}

#[tokio::test]
async fn the_estimate_is_charged_when_no_cost_is_reported() {
    let report = run(&shell_task("quiet", "true"), &attempt(1), Duration::from_secs(5)).await;
    assert!(report.success);
    assert_eq!(report.cost, 2.0);
}

#[tokio::test]
async fn failures_carry_the_last_stderr_line() {
    let task = shell_task("lint", "echo 'first problem' >&2; echo 'unused import' >&2; exit 1");
    let report = run(&task, &attempt(1), Duration::from_secs(5)).await;

    assert!(!report.success);
    let failure = report.failure().unwrap();
    assert_eq!(failure.class, ErrorClass::Systematic);
    assert_eq!(failure.message, "exit 1: unused import");
}

#[tokio::test]
async fn temporary_failure_exit_is_transient() {
    let report = run(&shell_task("fetch", "exit 75"), &attempt(1), Duration::from_secs(5)).await;
    assert_eq!(failure_class(&report), ErrorClass::Transient);
}

#[tokio::test]
async fn command_not_found_is_fatal() {
    let task = shell_task("missing", "definitely-not-a-real-binary-4821");
    let report = run(&task, &attempt(1), Duration::from_secs(5)).await;
    assert_eq!(failure_class(&report), ErrorClass::Fatal);
}

#[tokio::test]
async fn timeouts_are_transient_and_charge_the_estimate() {
    let report = run(&shell_task("slow", "sleep 5"), &attempt(1), Duration::from_millis(100)).await;

    assert!(!report.success);
    assert_eq!(report.cost, 2.0);
    let failure = report.failure().unwrap();
    assert_eq!(failure.class, ErrorClass::Transient);
    assert!(failure.message.contains("timed out"), "{}", failure.message);
}

#[tokio::test]
async fn a_task_without_a_command_is_fatal() {
    let report = run(&Task::new("manual"), &attempt(1), Duration::from_secs(5)).await;
    assert_eq!(failure_class(&report), ErrorClass::Fatal);
    assert_eq!(report.cost, 0.0);
}

#[tokio::test]
async fn the_child_sees_task_identity_and_hint() {
    let task = shell_task(
        "env-check",
        r#"test "$WORKDAG_TASK_ID" = env-check || exit 3
test "$WORKDAG_RUN_ID" = shell-run || exit 4
echo "WORKDAG_ARTIFACT=attempt-$WORKDAG_ATTEMPT"
echo "WORKDAG_ARTIFACT=hint-$WORKDAG_HINT""#,
    );
    let ctx = ExecutionContext {
        hint: Some("use-mirror".to_string()),
        ..attempt(4)
    };

    let report = run(&task, &ctx, Duration::from_secs(5)).await;

    assert!(report.success, "{:?}", report.failure());
    assert_eq!(report.artifacts, vec!["attempt-4", "hint-use-mirror"]);
}
