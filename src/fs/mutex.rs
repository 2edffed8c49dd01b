// src/fs/mutex.rs

//! Cross-process mutual exclusion via an exclusively-created lock file.
//!
//! Holding the guard means no other process (or thread) using the same lock
//! path is inside its critical section. A holder that crashes leaves the
//! file behind. It counts as stale once its recorded acquisition time, or
//! its mtime when the owner record is missing or torn, is older than
//! `stale_after`.
//!
//! Breaking a stale lock happens under a second exclusively-created
//! `<lock>.break` file, and staleness is checked again once that is held.
//! Two contenders that both saw the same stale owner therefore cannot both
//! remove a lock file: the second one finds the first one's fresh lock.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::FileSystem;
use crate::errors::{Result, WorkdagError};

#[derive(Debug, Serialize, Deserialize)]
struct MutexOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
    /// Unique per acquisition; lets a guard recognise its own lock file.
    #[serde(default)]
    token: String,
}

/// Lock-file mutex configuration for one path.
#[derive(Debug, Clone)]
pub struct FileMutex {
    path: PathBuf,
    wait: Duration,
    stale_after: Duration,
    poll: Duration,
}

impl FileMutex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wait: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            poll: Duration::from_millis(5),
        }
    }

    /// How long [`lock`](Self::lock) retries before giving up with `StoreBusy`.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn breaker_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".mutex".to_string());
        self.path.with_file_name(format!("{name}.break"))
    }

    /// Block until the lock file is ours, or `wait` elapses.
    pub fn lock<'a, F: FileSystem + ?Sized>(&self, fs: &'a F) -> Result<FileMutexGuard<'a, F>> {
        let started = Instant::now();
        let owner = MutexOwner {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            token: Uuid::new_v4().to_string(),
        };
        let payload = serde_json::to_string(&owner)?;

        loop {
            if fs.create_new(&self.path, payload.as_bytes())? {
                debug!(path = ?self.path, "acquired store mutex");
                return Ok(FileMutexGuard {
                    fs,
                    path: self.path.clone(),
                    payload,
                });
            }

            if self.break_if_stale(fs, &payload)? {
                continue;
            }

            if started.elapsed() >= self.wait {
                return Err(WorkdagError::StoreBusy(format!(
                    "timed out after {:?} waiting for {:?}",
                    self.wait, self.path
                )));
            }

            std::thread::sleep(self.poll);
        }
    }

    /// Remove the lock file if its holder is stale. Returns `true` when it
    /// was removed and acquisition should be retried at once.
    fn break_if_stale<F: FileSystem + ?Sized>(&self, fs: &F, payload: &str) -> Result<bool> {
        if !self.holder_is_stale(fs) {
            return Ok(false);
        }

        let breaker = self.breaker_path();
        if !fs.create_new(&breaker, payload.as_bytes())? {
            // Another contender is breaking it. A breaker left behind by a
            // crash expires the same way the lock does.
            if self.modified_before_cutoff(fs, &breaker) {
                warn!(path = ?breaker, "removing abandoned mutex breaker");
                fs.remove_file(&breaker)?;
            }
            return Ok(false);
        }

        let broken = if self.holder_is_stale(fs) {
            warn!(path = ?self.path, "breaking stale store mutex");
            fs.remove_file(&self.path).map(|_| true)
        } else {
            Ok(false)
        };
        fs.remove_file(&breaker)?;
        Ok(broken?)
    }

    fn holder_is_stale<F: FileSystem + ?Sized>(&self, fs: &F) -> bool {
        let Ok(content) = fs.read_to_string(&self.path) else {
            // Vanished since create_new failed; just retry.
            return false;
        };
        match serde_json::from_str::<MutexOwner>(&content) {
            Ok(owner) => Utc::now()
                .signed_duration_since(owner.acquired_at)
                .to_std()
                .is_ok_and(|age| age > self.stale_after),
            // Torn or empty: its writer either finishes shortly or died
            // between creating and writing it.
            Err(_) => self.modified_before_cutoff(fs, &self.path),
        }
    }

    fn modified_before_cutoff<F: FileSystem + ?Sized>(&self, fs: &F, path: &Path) -> bool {
        let Ok(modified) = fs.modified(path) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > self.stale_after)
    }
}

/// Releases the lock file on drop.
#[derive(Debug)]
pub struct FileMutexGuard<'a, F: FileSystem + ?Sized> {
    fs: &'a F,
    path: PathBuf,
    payload: String,
}

impl<F: FileSystem + ?Sized> Drop for FileMutexGuard<'_, F> {
    fn drop(&mut self) {
        match self.fs.read_to_string(&self.path) {
            Ok(content) if content == self.payload => {
                if let Err(e) = self.fs.remove_file(&self.path) {
                    warn!(path = ?self.path, error = %e, "failed to release store mutex");
                }
            }
            // Broken as stale while we held it; the file is someone else's now.
            _ => warn!(path = ?self.path, "store mutex was taken over while held"),
        }
    }
}
