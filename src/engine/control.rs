// src/engine/control.rs

//! Out-of-band operations on persisted runs, used by the CLI while no
//! runner is active for the run.

use chrono::Utc;
use tracing::info;

use crate::admission::HistoryEntry;
use crate::checkpoint::{Checkpoint, CheckpointDecision, CheckpointTrigger};
use crate::dag::Scheduler;
use crate::engine::{RunStatus, RunSummary};
use crate::errors::{Result, WorkdagError};
use crate::store::StateStore;
use crate::types::TaskId;

/// Explicit requeue of a blocked task and everything blocked because of
/// it. The run becomes resumable again. Returns the requeued ids.
pub fn unblock_task(store: &dyn StateStore, run_id: &str, task_id: &str) -> Result<Vec<TaskId>> {
    let mut record = store.load_run(run_id)?;
    let mut scheduler = Scheduler::submit(record.context, record.tasks)?;
    let requeued = scheduler.unblock(task_id)?;

    record.context = scheduler.context().clone();
    record.tasks = scheduler.snapshot_tasks();
    if record.status.is_finished() {
        record.status = RunStatus::Running;
    }
    record.updated_at = Utc::now();
    store.save_run(&record)?;

    info!(run_id, task = task_id, ?requeued, "task unblocked");
    Ok(requeued)
}

/// Resolve a checkpoint out of band.
///
/// The decision is recorded in the history ledger. Resolving a HICCUP
/// checkpoint with `retry` also unblocks its task so the next resume runs
/// it again. Admission decisions take effect when the paused run resumes.
pub fn resolve_checkpoint(
    store: &dyn StateStore,
    checkpoint_id: &str,
    option: &str,
    notes: Option<String>,
) -> Result<Checkpoint> {
    let checkpoint = store.resolve_checkpoint(checkpoint_id, option, notes)?;
    let Some(decision) = checkpoint.decision() else {
        return Ok(checkpoint);
    };

    let record = match store.load_run(&checkpoint.run_id) {
        Ok(record) => Some(record),
        Err(WorkdagError::RunNotFound(_)) => None,
        Err(e) => return Err(e),
    };
    let task = record
        .as_ref()
        .and_then(|r| r.tasks.iter().find(|t| t.id == checkpoint.task_id));

    if let Some(task) = task {
        let approved = matches!(
            decision,
            CheckpointDecision::Proceed | CheckpointDecision::Retry
        );
        store.append_history(&[HistoryEntry::decision(task, approved)])?;
    }

    if checkpoint.trigger == CheckpointTrigger::Hiccup && decision == CheckpointDecision::Retry {
        unblock_task(store, &checkpoint.run_id, &checkpoint.task_id)?;
    }
    Ok(checkpoint)
}

/// Summary of a persisted run.
pub fn run_status(store: &dyn StateStore, run_id: &str) -> Result<RunSummary> {
    let record = store.load_run(run_id)?;
    Ok(RunSummary::from_parts(
        record.status,
        record.tasks.iter(),
        &record.context,
    ))
}
