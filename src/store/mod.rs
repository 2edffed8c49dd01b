// src/store/mod.rs

//! Durable run state: run records, checkpoints and the history ledger.
//!
//! Records are JSON documents keyed by stable ids. Runs are
//! last-writer-wins; checkpoint resolution is exactly-once.

pub mod file;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::{HistoryEntry, TaskHistory};
use crate::checkpoint::Checkpoint;
use crate::dag::{RunContext, Task};
use crate::engine::RunStatus;
use crate::errors::Result;

pub use file::FileStateStore;

/// Everything needed to resume a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub tasks: Vec<Task>,
    pub context: RunContext,
    pub status: RunStatus,
    /// Checkpoint the run is paused on, if any.
    #[serde(default)]
    pub pending_checkpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub trait StateStore: Send + Sync {
    fn save_run(&self, record: &RunRecord) -> Result<()>;
    fn load_run(&self, run_id: &str) -> Result<RunRecord>;
    fn list_runs(&self) -> Result<Vec<String>>;

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint>;
    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>>;

    /// Resolve a stored checkpoint exactly once. Concurrent resolvers
    /// serialize; every one after the first gets
    /// [`CheckpointAlreadyResolved`](crate::errors::WorkdagError::CheckpointAlreadyResolved).
    /// Choosing `pause` leaves it pending and returns it unchanged.
    fn resolve_checkpoint(
        &self,
        checkpoint_id: &str,
        option: &str,
        notes: Option<String>,
    ) -> Result<Checkpoint>;

    fn load_history(&self) -> Result<TaskHistory>;
    fn append_history(&self, entries: &[HistoryEntry]) -> Result<()>;
}
