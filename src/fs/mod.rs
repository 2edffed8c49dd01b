// src/fs/mod.rs

//! Filesystem seam under the persistent stores.
//!
//! Everything the stores write goes through [`FileSystem`], so tests can run
//! several "processes" against one shared in-memory disk ([`mock`]) while
//! production uses [`RealFileSystem`]. On top of the trait sit two helpers
//! the stores rely on for cross-process safety:
//! - [`write_atomic`]: temp file + rename, so readers never see a torn record.
//! - [`mutex`]: an exclusive-create lock file guarding read-modify-write.

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;
pub mod mutex;

pub use mutex::{FileMutex, FileMutexGuard};

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;

    /// Last modification time of `path`.
    fn modified(&self, path: &Path) -> Result<SystemTime>;

    /// Create `path` with `contents` only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when the file already exists. This must be atomic
    /// with respect to other callers (and other processes for real disks).
    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<bool>;

    /// Return a list of entries in a directory.
    /// Returns full paths; a missing directory yields an empty list.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        ensure_parent(path)?;
        let mut file = fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents).with_context(|| format!("writing to file {:?}", path))?;
        file.sync_all().with_context(|| format!("syncing file {:?}", path))?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).with_context(|| format!("renaming {:?} to {:?}", from, to))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing file {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading mtime of {:?}", path))
    }

    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        ensure_parent(path)?;
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(contents)
                    .with_context(|| format!("writing to file {:?}", path))?;
                let _ = file.sync_all();
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("creating file {:?}", path)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let iter = match fs::read_dir(path) {
            Ok(iter) => iter,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading dir {:?}", path)),
        };
        let mut entries = Vec::new();
        for entry in iter {
            let entry = entry?;
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
    }
    Ok(())
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
///
/// The temp name carries the process id so two processes never share one.
pub fn write_atomic<F: FileSystem + ?Sized>(fs: &F, path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs.write(&tmp_path, contents)?;
    if let Err(e) = fs.rename(&tmp_path, path) {
        let _ = fs.remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
