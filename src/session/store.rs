// src/session/store.rs

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::errors::{Result, WorkdagError};
use crate::fs::{FileMutex, FileSystem, write_atomic};
use crate::session::SessionTable;

/// Persistence for the session table.
///
/// `transact` runs the closure as one critical section: no other caller
/// (thread or process, depending on the implementation) can observe or
/// modify the table in between its read and its write.
pub trait SessionStore: Send + Sync {
    fn transact(&self, f: &mut dyn FnMut(&mut SessionTable) -> Result<()>) -> Result<()>;
    fn snapshot(&self) -> Result<SessionTable>;
}

/// In-process store; callers in one process share it through an `Arc`.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    table: Mutex<SessionTable>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn transact(&self, f: &mut dyn FnMut(&mut SessionTable) -> Result<()>) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // Work on a copy so a failing closure leaves the table untouched.
        let mut draft = table.clone();
        f(&mut draft)?;
        *table = draft;
        Ok(())
    }

    fn snapshot(&self) -> Result<SessionTable> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table.clone())
    }
}

/// `sessions.json` under a state directory, guarded by a `.mutex` lock file
/// and rewritten atomically.
#[derive(Debug, Clone)]
pub struct FileSessionStore<F: FileSystem> {
    fs: F,
    path: PathBuf,
    mutex: FileMutex,
}

impl<F: FileSystem> FileSessionStore<F> {
    pub fn new(fs: F, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            fs,
            path: dir.join("sessions.json"),
            mutex: FileMutex::new(dir.join(".mutex")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SessionTable> {
        if !self.fs.exists(&self.path) {
            return Ok(SessionTable::default());
        }
        let content = self.fs.read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(SessionTable::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            WorkdagError::StoreCorrupt(format!("{:?}: {e}", self.path))
        })
    }
}

impl<F: FileSystem> SessionStore for FileSessionStore<F> {
    fn transact(&self, f: &mut dyn FnMut(&mut SessionTable) -> Result<()>) -> Result<()> {
        let _guard = self.mutex.lock(&self.fs)?;
        let mut table = self.read()?;
        f(&mut table)?;
        let json = serde_json::to_vec_pretty(&table)?;
        write_atomic(&self.fs, &self.path, &json)?;
        debug!(path = ?self.path, sessions = table.sessions.len(), "session table written");
        Ok(())
    }

    fn snapshot(&self) -> Result<SessionTable> {
        // Whole-file reads are safe without the mutex: writers rename.
        self.read()
    }
}
