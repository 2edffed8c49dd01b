// src/engine/runner.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionController, CheckpointGate, HistoryEntry, RiskAssessment, TaskHistory};
use crate::checkpoint::{Checkpoint, CheckpointDecision, DecisionSurface};
use crate::config::ConfigFile;
use crate::dag::{
    AutoDecision, AutoResolution, BlockReason, RunContext, Scheduler, SchedulerStep, Task,
};
use crate::engine::{CancelHandle, RunStatus, RunSummary, StepOutcome};
use crate::errors::{Result, WorkdagError};
use crate::exec::WorkExecutor;
use crate::recovery::{AdvisoryAnalyzer, RecoveryManager, RecoveryOutcome, SpentCost};
use crate::session::{ClaimResult, LockManager, SessionStatus, SessionStore};
use crate::store::{RunRecord, StateStore};

/// Shortest heartbeat period the runner will use.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// External pieces a run talks to. Production wires real implementations;
/// tests substitute scripted ones.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn WorkExecutor>,
    pub analyzer: Arc<dyn AdvisoryAnalyzer>,
    pub surface: Arc<dyn DecisionSurface>,
    pub store: Arc<dyn StateStore>,
    pub sessions: Arc<dyn SessionStore>,
}

/// Drives one run: ready set -> select -> preflight -> claim -> execute
/// under recovery -> fold outcome, persisting after every step.
///
/// One task executes at a time. A blocked task never halts the loop; the
/// run ends when nothing is ready, the budget is spent, a checkpoint pauses
/// it, or it is cancelled.
pub struct Runner {
    scheduler: Scheduler,
    admission: AdmissionController,
    locks: LockManager,
    recovery: RecoveryManager,
    executor: Arc<dyn WorkExecutor>,
    surface: Arc<dyn DecisionSurface>,
    store: Arc<dyn StateStore>,
    history: TaskHistory,
    holder: String,
    heartbeat_interval: Duration,
    cancel: CancelHandle,
    status: RunStatus,
    pending_checkpoint: Option<String>,
    created_at: DateTime<Utc>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("scheduler", &self.scheduler)
            .field("holder", &self.holder)
            .field("status", &self.status)
            .field("pending_checkpoint", &self.pending_checkpoint)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Start a fresh run over every task in `cfg`.
    pub fn start(cfg: &ConfigFile, run_id: Option<String>, collab: Collaborators) -> Result<Self> {
        let run_id = run_id.unwrap_or_else(new_run_id);
        let scheduler = Scheduler::from_config(cfg, run_id.clone())?;
        let runner = Self::assemble(cfg, scheduler, collab, RunStatus::Running, None, Utc::now())?;
        runner.persist()?;
        info!(
            run_id = %run_id,
            tasks = cfg.task.len(),
            budget = cfg.run.budget,
            holder = %runner.holder,
            "run started"
        );
        Ok(runner)
    }

    /// Reload a persisted run.
    ///
    /// Tasks left `IN_PROGRESS` by a crash go back to `READY`. A paused
    /// checkpoint that has been resolved since is applied; an unresolved
    /// one keeps the run paused. A `[run].budget` above the run's budget
    /// tops it up; blocked tasks still need an explicit unblock to use it.
    pub fn resume(cfg: &ConfigFile, run_id: &str, collab: Collaborators) -> Result<Self> {
        let record = collab.store.load_run(run_id)?;
        let mut scheduler = Scheduler::submit(record.context, record.tasks)?;
        let recovered = scheduler.recover_interrupted();
        scheduler.reconcile_blocks();

        let previous = scheduler.context().budget;
        if cfg.run.budget > previous {
            scheduler.context_mut().budget = cfg.run.budget;
            info!(run_id, previous, budget = cfg.run.budget, "run budget topped up");
        }

        let status = match record.status {
            RunStatus::BudgetExhausted if scheduler.context().budget_exhausted() => {
                RunStatus::BudgetExhausted
            }
            _ => RunStatus::Running,
        };
        let mut runner = Self::assemble(
            cfg,
            scheduler,
            collab,
            status,
            record.pending_checkpoint.clone(),
            record.created_at,
        )?;
        if let Some(checkpoint_id) = record.pending_checkpoint {
            runner.apply_pending_checkpoint(&checkpoint_id)?;
        }
        runner.persist()?;
        info!(run_id, ?recovered, status = %runner.status, "run resumed");
        Ok(runner)
    }

    fn assemble(
        cfg: &ConfigFile,
        scheduler: Scheduler,
        collab: Collaborators,
        status: RunStatus,
        pending_checkpoint: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let history = collab.store.load_history()?;
        let holder = cfg
            .run
            .holder
            .clone()
            .unwrap_or_else(|| default_holder(&scheduler.context().run_id));

        Ok(Self {
            admission: AdmissionController::new(cfg.risk.clone()),
            locks: LockManager::new(collab.sessions, cfg.sessions.ttl)
                .with_retention(cfg.sessions.retention),
            recovery: RecoveryManager::new(cfg.recovery, collab.analyzer),
            executor: collab.executor,
            surface: collab.surface,
            store: collab.store,
            history,
            holder,
            heartbeat_interval: cfg.sessions.heartbeat_interval.max(MIN_HEARTBEAT),
            cancel: CancelHandle::new(),
            status,
            pending_checkpoint,
            created_at,
            scheduler,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn context(&self) -> &RunContext {
        self.scheduler.context()
    }

    pub fn run_id(&self) -> &str {
        &self.scheduler.context().run_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn pending_checkpoint(&self) -> Option<&str> {
        self.pending_checkpoint.as_deref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_parts(self.status.clone(), self.scheduler.tasks(), self.context())
    }

    /// Loop until the run finishes or pauses.
    pub async fn run(&mut self) -> Result<RunSummary> {
        loop {
            match self.step().await? {
                StepOutcome::Finished(status) => {
                    info!(run_id = %self.run_id(), %status, "run finished");
                    break;
                }
                StepOutcome::Paused { checkpoint_id } => {
                    info!(run_id = %self.run_id(), checkpoint = %checkpoint_id, "run paused");
                    break;
                }
                step => debug!(?step, "step complete"),
            }
        }
        Ok(self.summary())
    }

    /// One iteration of the run loop.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if self.cancel.token().is_cancelled() {
            return self.finish(RunStatus::Cancelled);
        }
        if self.status.is_finished() {
            return Ok(StepOutcome::Finished(self.status.clone()));
        }
        if let Some(checkpoint_id) = &self.pending_checkpoint {
            return Ok(StepOutcome::Paused {
                checkpoint_id: checkpoint_id.clone(),
            });
        }

        let Some(task_id) = self.scheduler.select_next() else {
            let status = if self.context().blocked.is_empty() {
                RunStatus::Succeeded
            } else {
                RunStatus::Partial
            };
            return self.finish(status);
        };
        let task = self
            .scheduler
            .task(&task_id)
            .cloned()
            .ok_or_else(|| WorkdagError::TaskNotFound(task_id.clone()))?;

        let pre = self.admission.preflight(&task, self.context(), &self.history);
        if !pre.passed {
            let reason = pre.block_reason().unwrap_or(BlockReason::RiskTooHigh {
                score: pre.risk.as_ref().map_or(1.0, |r| r.score),
            });
            return self.block(&task_id, reason);
        }
        debug!(
            task = %task_id,
            requires_checkpoint = pre.requires_checkpoint,
            auto_approved = pre.auto_approved,
            "preflight passed"
        );

        if pre.requires_checkpoint {
            if let Some(risk) = &pre.risk {
                if let Some(outcome) = self.gate(&task, risk)? {
                    return Ok(outcome);
                }
            }
        }
        self.scheduler
            .context_mut()
            .pre_approved
            .remove(&task_id);

        self.execute(task).await
    }

    /// Checkpoint gating. `None` means go ahead and execute.
    fn gate(&mut self, task: &Task, risk: &RiskAssessment) -> Result<Option<StepOutcome>> {
        match self.admission.gate_checkpoint(risk, self.context()) {
            CheckpointGate::Prompt => {
                self.scheduler.context_mut().checkpoints_raised += 1;
                let checkpoint = Checkpoint::for_admission(self.run_id(), task, risk);
                self.store.save_checkpoint(&checkpoint)?;
                info!(
                    task = %task.id,
                    checkpoint = %checkpoint.checkpoint_id,
                    trigger = %checkpoint.trigger,
                    score = risk.score,
                    "checkpoint raised"
                );

                let decision = self.surface.decide(&checkpoint)?;
                let resolved = self.store.resolve_checkpoint(
                    &checkpoint.checkpoint_id,
                    &decision.option,
                    decision.notes,
                )?;
                match resolved.decision() {
                    Some(CheckpointDecision::Proceed) => {
                        self.record_history(HistoryEntry::decision(task, true))?;
                        Ok(None)
                    }
                    None => {
                        let checkpoint_id = checkpoint.checkpoint_id;
                        self.pending_checkpoint = Some(checkpoint_id.clone());
                        self.status = RunStatus::Paused {
                            checkpoint_id: checkpoint_id.clone(),
                        };
                        self.persist()?;
                        Ok(Some(StepOutcome::Paused { checkpoint_id }))
                    }
                    Some(_) => {
                        self.record_history(HistoryEntry::decision(task, false))?;
                        let reason = BlockReason::CheckpointSkipped {
                            checkpoint_id: checkpoint.checkpoint_id,
                        };
                        self.block(&task.id, reason).map(Some)
                    }
                }
            }
            CheckpointGate::AutoApprove => {
                warn!(
                    task = %task.id,
                    score = risk.score,
                    "checkpoint limit reached; auto-approving"
                );
                self.auto_resolve(task, risk, AutoDecision::Approved);
                Ok(None)
            }
            CheckpointGate::AutoBlock => {
                warn!(
                    task = %task.id,
                    score = risk.score,
                    "checkpoint limit reached; auto-blocking"
                );
                self.auto_resolve(task, risk, AutoDecision::Blocked);
                let reason = BlockReason::RiskTooHigh { score: risk.score };
                self.block(&task.id, reason).map(Some)
            }
        }
    }

    fn auto_resolve(&mut self, task: &Task, risk: &RiskAssessment, decision: AutoDecision) {
        self.scheduler
            .context_mut()
            .auto_resolved
            .push(AutoResolution {
                task_id: task.id.clone(),
                score: risk.score,
                decision,
            });
    }

    async fn execute(&mut self, task: Task) -> Result<StepOutcome> {
        let claim = match self.locks.try_claim(&task.id, &self.holder)? {
            ClaimResult::Claimed(claim) => claim,
            ClaimResult::AlreadyHeld { holder, age, .. } => {
                let reason = BlockReason::LockedElsewhere {
                    holder,
                    age_secs: i64::try_from(age.as_secs()).unwrap_or(i64::MAX),
                };
                return self.block(&task.id, reason);
            }
        };

        self.scheduler.start(&task.id)?;
        self.persist()?;

        let run_id = self.run_id().to_string();
        let mut cancelled = self.cancel.token();
        let spent = SpentCost::new();
        let outcome = {
            let exec = self
                .recovery
                .execute_metered(&task, self.executor.as_ref(), &run_id, &spent);
            tokio::pin!(exec);

            let mut ticker = tokio::time::interval(self.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    outcome = &mut exec => break Some(outcome),
                    _ = ticker.tick() => self.heartbeat(&claim.session_id),
                    _ = cancelled.cancelled() => break None,
                }
            }
        };

        let Some(outcome) = outcome else {
            let spent = spent.get();
            warn!(task = %task.id, spent, "run cancelled mid-execution");
            self.scheduler.context_mut().add_cost(spent);
            self.locks
                .release(&claim.session_id, SessionStatus::Interrupted)?;
            self.scheduler.interrupt(&task.id)?;
            return self.finish(RunStatus::Cancelled);
        };

        self.locks.release(&claim.session_id, SessionStatus::Complete)?;
        let retries = u32::try_from(outcome.executions().saturating_sub(1)).unwrap_or(u32::MAX);
        self.scheduler.set_retry_count(&task.id, retries)?;
        self.record_history(HistoryEntry::outcome(&task, outcome.is_success()))?;

        let success = outcome.is_success();
        let cost = outcome.cost();
        let step = match outcome {
            RecoveryOutcome::Completed { artifacts, .. } => {
                if !artifacts.is_empty() {
                    info!(task = %task.id, ?artifacts, "task produced artifacts");
                }
                self.scheduler.record_success(&task.id, cost)?
            }
            RecoveryOutcome::Escalated { checkpoint, .. } => {
                self.store.save_checkpoint(&checkpoint)?;
                let reason = BlockReason::Escalated {
                    checkpoint_id: checkpoint.checkpoint_id.clone(),
                };
                self.scheduler.record_failure(&task.id, reason, cost)?
            }
        };
        log_step(&task.id, &step);

        if step.budget_exhausted {
            warn!(
                running_cost = self.context().running_cost,
                budget = self.context().budget,
                "budget exhausted"
            );
            self.status = RunStatus::BudgetExhausted;
        }
        self.persist()?;

        Ok(StepOutcome::Executed {
            task_id: task.id,
            success,
            cost,
        })
    }

    fn heartbeat(&self, session_id: &str) {
        match self.locks.heartbeat(session_id) {
            Ok(true) => {}
            Ok(false) => warn!(session = %session_id, "claim lost while executing"),
            Err(e) => warn!(session = %session_id, error = %e, "heartbeat failed"),
        }
    }

    fn block(&mut self, task_id: &str, reason: BlockReason) -> Result<StepOutcome> {
        let step = self.scheduler.block(task_id, reason.clone())?;
        log_step(task_id, &step);
        self.persist()?;
        Ok(StepOutcome::Blocked {
            task_id: task_id.to_string(),
            reason,
        })
    }

    fn finish(&mut self, status: RunStatus) -> Result<StepOutcome> {
        self.status = status.clone();
        self.persist()?;
        Ok(StepOutcome::Finished(status))
    }

    fn apply_pending_checkpoint(&mut self, checkpoint_id: &str) -> Result<()> {
        let checkpoint = self.store.load_checkpoint(checkpoint_id)?;
        let task_id = checkpoint.task_id.clone();
        match checkpoint.decision() {
            None => {
                info!(checkpoint = %checkpoint_id, "checkpoint still unresolved; staying paused");
                self.status = RunStatus::Paused {
                    checkpoint_id: checkpoint_id.to_string(),
                };
                return Ok(());
            }
            Some(CheckpointDecision::Proceed) => {
                info!(task = %task_id, "checkpoint approved while paused");
                self.scheduler
                    .context_mut()
                    .pre_approved
                    .insert(task_id);
            }
            Some(_) => {
                let skippable = self
                    .scheduler
                    .task(&task_id)
                    .is_some_and(|t| !t.is_terminal());
                if skippable {
                    let step = self.scheduler.block(
                        &task_id,
                        BlockReason::CheckpointSkipped {
                            checkpoint_id: checkpoint_id.to_string(),
                        },
                    )?;
                    log_step(&task_id, &step);
                }
            }
        }
        self.pending_checkpoint = None;
        self.status = RunStatus::Running;
        Ok(())
    }

    fn record_history(&mut self, entry: HistoryEntry) -> Result<()> {
        self.store.append_history(std::slice::from_ref(&entry))?;
        self.history.push(entry);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let record = RunRecord {
            run_id: self.run_id().to_string(),
            tasks: self.scheduler.snapshot_tasks(),
            context: self.context().clone(),
            status: self.status.clone(),
            pending_checkpoint: self.pending_checkpoint.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        };
        self.store.save_run(&record)
    }
}

fn log_step(task_id: &str, step: &SchedulerStep) {
    if !step.newly_ready.is_empty() {
        debug!(task = %task_id, ready = ?step.newly_ready, "dependents became ready");
    }
    if let Some((_, cascaded)) = step.newly_blocked.split_first() {
        if !cascaded.is_empty() {
            info!(task = %task_id, ?cascaded, "dependents blocked transitively");
        }
    }
}

/// `<UTC timestamp>-<8 hex chars>`, sortable by start time.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}

/// `<run_id>@<hostname>`: stable across a crash and resume of one run.
pub fn default_holder(run_id: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{run_id}@{host}")
}
