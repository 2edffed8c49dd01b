// src/store/file.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::admission::{HistoryEntry, TaskHistory};
use crate::checkpoint::Checkpoint;
use crate::errors::{Result, WorkdagError};
use crate::fs::{FileMutex, FileSystem, write_atomic};
use crate::session::{FileSessionStore, SessionStore};
use crate::store::{RunRecord, StateStore};

/// JSON files under a state directory:
///
/// ```text
/// <root>/runs/<run_id>.json
/// <root>/checkpoints/<checkpoint_id>.json
/// <root>/history/history.json
/// <root>/sessions/sessions.json
/// ```
///
/// Every write is temp file + rename. Checkpoint and history updates also
/// hold the `.mutex` lock file of their directory.
#[derive(Debug, Clone)]
pub struct FileStateStore<F: FileSystem + Clone> {
    fs: F,
    root: PathBuf,
    checkpoints_mutex: FileMutex,
    history_mutex: FileMutex,
}

impl<F: FileSystem + Clone + 'static> FileStateStore<F> {
    pub fn new(fs: F, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            checkpoints_mutex: FileMutex::new(root.join("checkpoints").join(".mutex")),
            history_mutex: FileMutex::new(root.join("history").join(".mutex")),
            fs,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session table sharing this store's directory and filesystem.
    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::new(FileSessionStore::new(
            self.fs.clone(),
            self.root.join("sessions"),
        ))
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(format!("{checkpoint_id}.json"))
    }

    fn history_path(&self) -> PathBuf {
        self.root.join("history").join("history.json")
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.fs, path, &json)?;
        debug!(path = ?path, "record written");
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = self.fs.read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| WorkdagError::StoreCorrupt(format!("{path:?}: {e}")))
    }

    /// Ids of the `*.json` records in `dir`, sorted.
    fn record_ids(&self, dir: &Path) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .fs
            .read_dir(dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|s| !s.starts_with('.'))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl<F: FileSystem + Clone + 'static> StateStore for FileStateStore<F> {
    fn save_run(&self, record: &RunRecord) -> Result<()> {
        self.write_json(&self.run_path(&record.run_id), record)
    }

    fn load_run(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_path(run_id);
        if !self.fs.exists(&path) {
            return Err(WorkdagError::RunNotFound(run_id.to_string()));
        }
        self.read_json(&path)
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        self.record_ids(&self.root.join("runs"))
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.checkpoints_mutex.lock(&self.fs)?;
        self.write_json(&self.checkpoint_path(&checkpoint.checkpoint_id), checkpoint)
    }

    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let path = self.checkpoint_path(checkpoint_id);
        if !self.fs.exists(&path) {
            return Err(WorkdagError::CheckpointNotFound(checkpoint_id.to_string()));
        }
        self.read_json(&path)
    }

    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = self
            .record_ids(&self.root.join("checkpoints"))?
            .iter()
            .map(|id| self.load_checkpoint(id))
            .collect::<Result<Vec<_>>>()?;
        checkpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(checkpoints)
    }

    fn resolve_checkpoint(
        &self,
        checkpoint_id: &str,
        option: &str,
        notes: Option<String>,
    ) -> Result<Checkpoint> {
        let _guard = self.checkpoints_mutex.lock(&self.fs)?;
        let mut checkpoint = self.load_checkpoint(checkpoint_id)?;
        if checkpoint.resolve(option, notes)? {
            self.write_json(&self.checkpoint_path(checkpoint_id), &checkpoint)?;
            info!(checkpoint = %checkpoint_id, option, "checkpoint resolved");
        } else {
            info!(checkpoint = %checkpoint_id, "checkpoint left pending");
        }
        Ok(checkpoint)
    }

    fn load_history(&self) -> Result<TaskHistory> {
        let path = self.history_path();
        if !self.fs.exists(&path) {
            return Ok(TaskHistory::default());
        }
        self.read_json(&path)
    }

    fn append_history(&self, entries: &[HistoryEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.history_mutex.lock(&self.fs)?;
        let mut history = self.load_history()?;
        for entry in entries {
            history.push(entry.clone());
        }
        self.write_json(&self.history_path(), &history)
    }
}
