// src/recovery/manager.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::dag::Task;
use crate::exec::{ErrorClass, ExecutionContext, ExecutionFailure, WorkExecutor};
use crate::recovery::analyzer::{AdviceAction, AdvisoryAnalyzer};
use crate::recovery::{AttemptOutcome, RecoveryAttempt, RecoveryPolicy, RecoveryTier};

/// Final disposition of one task's execution under recovery.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Completed {
        cost: f64,
        attempts: Vec<RecoveryAttempt>,
        artifacts: Vec<String>,
    },
    Escalated {
        checkpoint: Box<Checkpoint>,
        cost: f64,
        attempts: Vec<RecoveryAttempt>,
    },
}

impl RecoveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryOutcome::Completed { .. })
    }

    /// Summed cost of every execution, failed ones included.
    pub fn cost(&self) -> f64 {
        match self {
            RecoveryOutcome::Completed { cost, .. } | RecoveryOutcome::Escalated { cost, .. } => {
                *cost
            }
        }
    }

    pub fn attempts(&self) -> &[RecoveryAttempt] {
        match self {
            RecoveryOutcome::Completed { attempts, .. }
            | RecoveryOutcome::Escalated { attempts, .. } => attempts,
        }
    }

    /// Number of times the executor actually ran.
    pub fn executions(&self) -> usize {
        self.attempts()
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Escalated)
            .count()
    }
}

/// Executor cost spent so far on one task. Readable while the recovery
/// future is still pending, and after it was dropped.
#[derive(Debug, Default)]
pub struct SpentCost(AtomicU64);

impl SpentCost {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, cost: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + cost).to_bits())
            });
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

/// Wraps a single task execution with TRANSIENT -> ALTERNATIVE -> ESCALATE.
///
/// Every non-fatal failure first spends the transient budget: transient
/// errors back off before retrying, systematic ones retry immediately. Once
/// `transient_max` executions have failed, each further failure consults
/// the analyzer, allowing up to `alternative_max` guided retries. An
/// always-failing task therefore runs `transient_max + alternative_max`
/// times at most.
pub struct RecoveryManager {
    policy: RecoveryPolicy,
    analyzer: Arc<dyn AdvisoryAnalyzer>,
}

impl RecoveryManager {
    pub fn new(policy: RecoveryPolicy, analyzer: Arc<dyn AdvisoryAnalyzer>) -> Self {
        Self { policy, analyzer }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub async fn execute(
        &self,
        task: &Task,
        executor: &dyn WorkExecutor,
        run_id: &str,
    ) -> RecoveryOutcome {
        self.execute_metered(task, executor, run_id, &SpentCost::new())
            .await
    }

    /// [`execute`](Self::execute), adding each execution's cost to `spent`
    /// as soon as it is reported.
    pub async fn execute_metered(
        &self,
        task: &Task,
        executor: &dyn WorkExecutor,
        run_id: &str,
        spent: &SpentCost,
    ) -> RecoveryOutcome {
        let mut ledger = Ledger::new(run_id, task);
        let mut tier = RecoveryTier::Transient;
        let mut transient_used = 0u32;
        let mut alternative_used = 0u32;
        let mut hint: Option<String> = None;

        loop {
            let attempt = ledger.attempts.len() as u32 + 1;
            let ctx = ExecutionContext {
                run_id: run_id.to_string(),
                attempt,
                hint: hint.clone(),
            };
            debug!(task = %task.id, attempt, %tier, "executing");

            let failure = match executor.execute(task, &ctx).await {
                Ok(report) => {
                    ledger.cost += report.cost;
                    spent.add(report.cost);
                    match report.failure() {
                        None => {
                            ledger.record(tier, None, 0.0, AttemptOutcome::Succeeded);
                            info!(
                                task = %task.id,
                                attempts = attempt,
                                cost = ledger.cost,
                                "task execution succeeded"
                            );
                            return RecoveryOutcome::Completed {
                                cost: ledger.cost,
                                attempts: ledger.attempts,
                                artifacts: report.artifacts,
                            };
                        }
                        Some(failure) => failure,
                    }
                }
                Err(e) => ExecutionFailure {
                    class: ErrorClass::Fatal,
                    message: format!("executor error: {e}"),
                },
            };

            match tier {
                RecoveryTier::Transient => transient_used += 1,
                RecoveryTier::Alternative => alternative_used += 1,
                RecoveryTier::Escalate => {}
            }
            warn!(
                task = %task.id,
                attempt,
                %tier,
                class = %failure.class,
                error = %failure.message,
                "task execution failed"
            );

            if failure.class == ErrorClass::Fatal {
                ledger.record(tier, Some(&failure), 0.0, AttemptOutcome::Failed);
                return ledger.escalate(tier, &failure, "fatal error bypasses retry tiers");
            }

            if tier == RecoveryTier::Transient && transient_used < self.policy.transient_max {
                let backoff = if failure.class == ErrorClass::Transient {
                    self.policy.backoff.delay(transient_used - 1)
                } else {
                    Duration::ZERO
                };
                ledger.record(
                    tier,
                    Some(&failure),
                    backoff.as_secs_f64(),
                    AttemptOutcome::Failed,
                );
                if !backoff.is_zero() {
                    debug!(task = %task.id, ?backoff, "backing off before retry");
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }

            ledger.record(tier, Some(&failure), 0.0, AttemptOutcome::Failed);

            if alternative_used >= self.policy.alternative_max {
                let reason = if tier == RecoveryTier::Transient {
                    "transient tier exhausted, no alternative attempts allowed"
                } else {
                    "alternative tier exhausted"
                };
                return ledger.escalate(tier, &failure, reason);
            }

            if tier != RecoveryTier::Alternative {
                info!(task = %task.id, from = %tier, to = %RecoveryTier::Alternative, "recovery tier transition");
                tier = RecoveryTier::Alternative;
            }

            let analysis = tokio::time::timeout(
                self.policy.analyzer_timeout,
                self.analyzer.analyze(task, &failure, &ledger.attempts),
            )
            .await;

            let advice = match analysis {
                Ok(Ok(advice)) => advice,
                Ok(Err(e)) => {
                    warn!(task = %task.id, error = %e, "advisory analyzer failed");
                    return ledger.escalate(tier, &failure, "advisory analyzer failed");
                }
                Err(_) => {
                    warn!(
                        task = %task.id,
                        timeout = ?self.policy.analyzer_timeout,
                        "advisory analyzer timed out"
                    );
                    return ledger.escalate(tier, &failure, "advisory analyzer timed out");
                }
            };

            info!(
                task = %task.id,
                action = %advice.action,
                reasoning = %advice.reasoning,
                "analyzer advice"
            );
            match advice.action {
                AdviceAction::Alternative => hint = advice.hint,
                AdviceAction::Diagnostics => {
                    info!(task = %task.id, diagnostics = %advice.reasoning, "analyzer diagnostics");
                    return ledger.escalate(tier, &failure, "analyzer requested diagnostics");
                }
                AdviceAction::Unblock => {
                    info!(task = %task.id, blocker = %advice.reasoning, "analyzer reports external blocker");
                    return ledger.escalate(tier, &failure, "analyzer reports an external blocker");
                }
                AdviceAction::Escalate => {
                    return ledger.escalate(tier, &failure, "analyzer advised escalation");
                }
            }
        }
    }
}

struct Ledger<'a> {
    run_id: &'a str,
    task: &'a Task,
    attempts: Vec<RecoveryAttempt>,
    cost: f64,
}

impl<'a> Ledger<'a> {
    fn new(run_id: &'a str, task: &'a Task) -> Self {
        Self {
            run_id,
            task,
            attempts: Vec::new(),
            cost: 0.0,
        }
    }

    fn record(
        &mut self,
        tier: RecoveryTier,
        failure: Option<&ExecutionFailure>,
        backoff_seconds_used: f64,
        outcome: AttemptOutcome,
    ) {
        self.attempts.push(RecoveryAttempt {
            attempt_number: self.attempts.len() as u32 + 1,
            tier,
            error_summary: failure.map(ToString::to_string),
            backoff_seconds_used,
            outcome,
        });
    }

    fn escalate(
        mut self,
        tier: RecoveryTier,
        failure: &ExecutionFailure,
        reason: &str,
    ) -> RecoveryOutcome {
        let executions = self.attempts.len();
        self.record(
            RecoveryTier::Escalate,
            Some(failure),
            0.0,
            AttemptOutcome::Escalated,
        );
        let rationale = format!(
            "{reason} after {executions} attempt(s) in tier {tier}; last error: {failure}"
        );
        warn!(
            task = %self.task.id,
            run_id = self.run_id,
            executions,
            %tier,
            reason,
            "recovery escalated to human"
        );
        let checkpoint =
            Checkpoint::for_escalation(self.run_id, self.task, rationale, self.attempts.clone());
        RecoveryOutcome::Escalated {
            checkpoint: Box::new(checkpoint),
            cost: self.cost,
            attempts: self.attempts,
        }
    }
}
