// tests/advisory_command.rs
#![cfg(unix)]

mod common;
use crate::common::fakes::ScriptedExecutor;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use workdag::dag::Task;
use workdag::exec::{ErrorClass, ExecutionReport};
use workdag::recovery::{
    BackoffPolicy, CommandAnalyzer, RecoveryManager, RecoveryOutcome, RecoveryPolicy,
    RecoveryTier,
};

/// One plain retry, then one analyzer-guided one.
fn policy() -> RecoveryPolicy {
    RecoveryPolicy {
        transient_max: 1,
        alternative_max: 1,
        backoff: BackoffPolicy {
            base: Duration::from_millis(1),
            multiplier: 2.0,
            max: Duration::from_millis(1),
            jitter: 0.0,
        },
        analyzer_timeout: Duration::from_secs(3),
    }
}

fn manager(command: &str) -> RecoveryManager {
    RecoveryManager::new(policy(), Arc::new(CommandAnalyzer::new(command)))
}

/// Fails systematically once, then succeeds.
fn flaky_executor(task_id: &str) -> Arc<ScriptedExecutor> {
    let executor = ScriptedExecutor::new();
    executor.script(
        task_id,
        [
            ExecutionReport::failed(ErrorClass::Systematic, "404 from the package index", 0.5),
            ExecutionReport::succeeded(1.0),
        ],
    );
    executor
}

fn escalation_rationale(outcome: RecoveryOutcome) -> String {
    match outcome {
        RecoveryOutcome::Escalated { checkpoint, .. } => checkpoint.rationale.clone(),
        other => panic!("expected escalation, got {other:?}"),
    }
}

#[tokio::test]
async fn alternative_advice_from_the_command_is_retried_with_its_hint() {
    init_tracing();
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let analyzer = manager(
        r#"cat >/dev/null; echo '{"action":"alternative","hint":"use the mirror","reasoning":"primary index is down"}'"#,
    );

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-1")).await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.cost(), 1.5);
    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].hint, None);
    assert_eq!(calls[1].hint.as_deref(), Some("use the mirror"));
    assert_eq!(outcome.attempts()[1].tier, RecoveryTier::Alternative);
}

#[tokio::test]
async fn the_command_receives_the_failure_and_the_task_id() {
    init_tracing();
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    // Only answers when the request on stdin names the failure.
    let analyzer = manager(
        r#"grep -q 'package index' || exit 9; echo "{\"action\":\"alternative\",\"hint\":\"retry $WORKDAG_TASK_ID\"}""#,
    );

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-2")).await;

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(executor.calls()[1].hint.as_deref(), Some("retry fetch"));
}

#[tokio::test]
async fn malformed_command_output_escalates() {
    init_tracing();
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let analyzer = manager("cat >/dev/null; echo 'try turning it off and on again'");

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-3")).await;

    assert_eq!(executor.executions_of("fetch"), 1);
    assert!(escalation_rationale(outcome).contains("advisory analyzer failed"));
}

#[tokio::test]
async fn an_unknown_action_escalates() {
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let analyzer = manager(r#"cat >/dev/null; echo '{"action":"reboot"}'"#);

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-4")).await;

    assert_eq!(executor.executions_of("fetch"), 1);
    assert!(escalation_rationale(outcome).contains("advisory analyzer failed"));
}

#[tokio::test]
async fn a_failing_command_escalates() {
    init_tracing();
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let analyzer = manager(
        r#"cat >/dev/null; echo '{"action":"alternative","hint":"ignored"}'; echo 'model unavailable' >&2; exit 3"#,
    );

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-5")).await;

    assert_eq!(executor.executions_of("fetch"), 1);
    assert!(executor.calls().iter().all(|c| c.hint.is_none()));
    assert!(escalation_rationale(outcome).contains("advisory analyzer failed"));
}

#[tokio::test]
async fn diagnostics_advice_from_the_command_escalates() {
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let analyzer = manager(
        r#"cat >/dev/null; echo '{"action":"diagnostics","reasoning":"capture the resolver log"}'"#,
    );

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-6")).await;

    assert_eq!(executor.executions_of("fetch"), 1);
    assert!(escalation_rationale(outcome).contains("analyzer requested diagnostics"));
}

#[tokio::test]
async fn a_command_that_ignores_its_input_still_answers() {
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let analyzer = manager(r#"echo '{"action":"alternative","hint":"use the mirror"}'"#);

    let outcome = with_timeout(analyzer.execute(&task, executor.as_ref(), "cmd-7")).await;

    assert!(outcome.is_success(), "{outcome:?}");
}

#[tokio::test]
async fn a_hung_command_is_cut_off_by_the_analyzer_timeout() {
    let task = Task::new("fetch");
    let executor = flaky_executor("fetch");
    let mut policy = policy();
    policy.analyzer_timeout = Duration::from_millis(200);
    let manager = RecoveryManager::new(policy, Arc::new(CommandAnalyzer::new("sleep 30")));

    let outcome = with_timeout(manager.execute(&task, executor.as_ref(), "cmd-8")).await;

    assert!(escalation_rationale(outcome).contains("timed out"));
}
