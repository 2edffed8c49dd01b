// src/recovery/analyzer.rs

//! Advisory analyzer consulted once the transient tier is spent.

use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::dag::Task;
use crate::errors::Result;
use crate::exec::ExecutionFailure;
use crate::recovery::RecoveryAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceAction {
    /// Retry with the supplied hint.
    Alternative,
    /// Collect diagnostics, then escalate.
    Diagnostics,
    /// The blocker is outside the task; escalate so a human can clear it.
    Unblock,
    Escalate,
}

impl fmt::Display for AdviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdviceAction::Alternative => write!(f, "ALTERNATIVE"),
            AdviceAction::Diagnostics => write!(f, "DIAGNOSTICS"),
            AdviceAction::Unblock => write!(f, "UNBLOCK"),
            AdviceAction::Escalate => write!(f, "ESCALATE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub action: AdviceAction,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Advice {
    pub fn escalate(reasoning: impl Into<String>) -> Self {
        Self {
            action: AdviceAction::Escalate,
            hint: None,
            reasoning: reasoning.into(),
        }
    }

    pub fn alternative(hint: impl Into<String>) -> Self {
        Self {
            action: AdviceAction::Alternative,
            hint: Some(hint.into()),
            reasoning: String::new(),
        }
    }
}

/// Opaque failure analysis. Implementations may be slow; callers bound them
/// with a timeout and treat any error as ESCALATE.
pub trait AdvisoryAnalyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        task: &'a Task,
        failure: &'a ExecutionFailure,
        attempts: &'a [RecoveryAttempt],
    ) -> Pin<Box<dyn Future<Output = Result<Advice>> + Send + 'a>>;
}

/// Used when no analyzer command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalatingAnalyzer;

impl AdvisoryAnalyzer for EscalatingAnalyzer {
    fn analyze<'a>(
        &'a self,
        _task: &'a Task,
        _failure: &'a ExecutionFailure,
        _attempts: &'a [RecoveryAttempt],
    ) -> Pin<Box<dyn Future<Output = Result<Advice>> + Send + 'a>> {
        Box::pin(async { Ok(Advice::escalate("no advisory analyzer configured")) })
    }
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    task_id: &'a str,
    description: &'a str,
    command: Option<&'a str>,
    error: &'a ExecutionFailure,
    attempts: &'a [RecoveryAttempt],
}

/// Runs a shell command, writes an analysis request as JSON to its stdin
/// and parses an [`Advice`] record from its stdout.
///
/// ```text
/// {"action": "alternative", "hint": "use the v2 endpoint", "reasoning": "..."}
/// ```
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    command: String,
}

impl CommandAnalyzer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(
        &self,
        task: &Task,
        failure: &ExecutionFailure,
        attempts: &[RecoveryAttempt],
    ) -> Result<Advice> {
        let request = serde_json::to_vec(&AnalysisRequest {
            task_id: &task.id,
            description: &task.description,
            command: task.command.as_deref(),
            error: failure,
            attempts,
        })?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("WORKDAG_TASK_ID", &task.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning analyzer '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&request).await {
                Ok(()) => {}
                // An analyzer is free to ignore its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(task = %task.id, "analyzer closed stdin early");
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context("writing analysis request")
                        .into());
                }
            }
            // Dropping stdin closes the pipe so the analyzer sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .context("waiting for analyzer")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "analyzer exited with {}: {}",
                output.status,
                stderr.trim()
            )
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(task = %task.id, stdout = %stdout.trim(), "analyzer replied");
        let advice: Advice = serde_json::from_str(stdout.trim())?;
        Ok(advice)
    }
}

impl AdvisoryAnalyzer for CommandAnalyzer {
    fn analyze<'a>(
        &'a self,
        task: &'a Task,
        failure: &'a ExecutionFailure,
        attempts: &'a [RecoveryAttempt],
    ) -> Pin<Box<dyn Future<Output = Result<Advice>> + Send + 'a>> {
        Box::pin(self.run(task, failure, attempts))
    }
}
