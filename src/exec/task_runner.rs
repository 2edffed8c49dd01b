// src/exec/task_runner.rs

//! Shell-backed work executor.
//!
//! Runs the task's `command` through `sh -c` (or `cmd /C` on Windows) and
//! turns the exit status into an [`ExecutionReport`]. The child sees
//! `WORKDAG_TASK_ID`, `WORKDAG_RUN_ID`, `WORKDAG_ATTEMPT` and, on guided
//! retries, `WORKDAG_HINT`.
//!
//! Stdout lines of the form `WORKDAG_COST=<f64>` report the actual cost
//! (summed; the estimate is used when none is reported) and
//! `WORKDAG_ARTIFACT=<text>` lines are collected as artifacts.
//!
//! Exit status classification:
//!
//! | status              | class      |
//! |---------------------|------------|
//! | 0                   | success    |
//! | 75, 124, timeout    | transient  |
//! | killed by signal    | transient  |
//! | 126, 127            | fatal      |
//! | anything else       | systematic |

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::Task;
use crate::errors::Result;
use crate::exec::backend::{ErrorClass, ExecutionContext, ExecutionReport, WorkExecutor};

const COST_PREFIX: &str = "WORKDAG_COST=";
const ARTIFACT_PREFIX: &str = "WORKDAG_ARTIFACT=";

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl WorkExecutor for ShellExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionReport>> + Send + 'a>> {
        Box::pin(run_command(task, ctx, self.timeout))
    }
}

/// Map a process exit code to a failure class. `None` means the process was
/// terminated by a signal.
pub fn classify_exit(code: Option<i32>) -> ErrorClass {
    match code {
        Some(75) | Some(124) | None => ErrorClass::Transient,
        Some(126) | Some(127) => ErrorClass::Fatal,
        Some(_) => ErrorClass::Systematic,
    }
}

#[derive(Debug, Default)]
struct StdoutReport {
    cost: Option<f64>,
    artifacts: Vec<String>,
}

impl StdoutReport {
    fn absorb(&mut self, line: &str) {
        let line = line.trim();
        if let Some(value) = line.strip_prefix(COST_PREFIX) {
            match value.trim().parse::<f64>() {
                Ok(cost) if cost.is_finite() && cost >= 0.0 => {
                    *self.cost.get_or_insert(0.0) += cost;
                }
                _ => warn!(line, "ignoring malformed cost report"),
            }
        } else if let Some(artifact) = line.strip_prefix(ARTIFACT_PREFIX) {
            self.artifacts.push(artifact.trim().to_string());
        }
    }
}

async fn run_command(
    task: &Task,
    ctx: &ExecutionContext,
    timeout: Duration,
) -> Result<ExecutionReport> {
    let Some(command) = task.command.as_deref() else {
        return Ok(ExecutionReport::failed(
            ErrorClass::Fatal,
            format!("task '{}' has no command", task.id),
            0.0,
        ));
    };

    info!(
        task = %task.id,
        run_id = %ctx.run_id,
        attempt = ctx.attempt,
        cmd = %command,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.env("WORKDAG_TASK_ID", &task.id)
        .env("WORKDAG_RUN_ID", &ctx.run_id)
        .env("WORKDAG_ATTEMPT", ctx.attempt.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(hint) = &ctx.hint {
        cmd.env("WORKDAG_HINT", hint);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.id))?;

    let stdout_handle = child.stdout.take().map(|stdout| {
        let task_id = task.id.clone();
        tokio::spawn(async move {
            let mut report = StdoutReport::default();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, "stdout: {}", line);
                report.absorb(&line);
            }
            report
        })
    });

    // Always consume stderr so buffers don't fill; keep the last line as the
    // error summary.
    let stderr_handle = child.stderr.take().map(|stderr| {
        let task_id = task.id.clone();
        tokio::spawn(async move {
            let mut last = None;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, "stderr: {}", line);
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    });

    let status = tokio::select! {
        status_res = child.wait() => {
            status_res.with_context(|| format!("waiting for process of task '{}'", task.id))?
        }
        _ = tokio::time::sleep(timeout) => {
            warn!(task = %task.id, ?timeout, "task process timed out; killing");
            if let Err(e) = child.kill().await {
                warn!(task = %task.id, error = %e, "failed to kill timed-out process");
            }
            return Ok(ExecutionReport::failed(
                ErrorClass::Transient,
                format!("timed out after {timeout:?}"),
                task.estimated_cost,
            ));
        }
    };

    let stdout = match stdout_handle {
        Some(h) => h.await.unwrap_or_default(),
        None => StdoutReport::default(),
    };
    let last_stderr = match stderr_handle {
        Some(h) => h.await.ok().flatten(),
        None => None,
    };

    let cost = stdout.cost.unwrap_or(task.estimated_cost);
    info!(
        task = %task.id,
        run_id = %ctx.run_id,
        exit_code = ?status.code(),
        success = status.success(),
        cost,
        "task process exited"
    );

    if status.success() {
        return Ok(ExecutionReport::succeeded(cost).with_artifacts(stdout.artifacts));
    }

    let class = classify_exit(status.code());
    let code = status
        .code()
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    let message = match last_stderr {
        Some(line) => format!("exit {code}: {line}"),
        None => format!("exit {code}"),
    };
    Ok(ExecutionReport::failed(class, message, cost).with_artifacts(stdout.artifacts))
}
