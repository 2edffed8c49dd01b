// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    modified: SystemTime,
}

impl MockFile {
    fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            modified: SystemTime::now(),
        }
    }
}

/// In-memory filesystem.
///
/// Clones share the same underlying map, so handing clones to several
/// stores simulates independent processes writing to one disk.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, MockFile>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path.as_ref().to_path_buf(), MockFile::new(content.into()));
    }

    /// Backdate (or postdate) an existing file's mtime.
    pub fn set_modified(&self, path: impl AsRef<Path>, modified: SystemTime) {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = files.get_mut(path.as_ref()) {
            file.modified = modified;
        }
    }

    /// All paths currently stored, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.keys().cloned().collect()
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        match files.get(path) {
            Some(file) => Ok(String::from_utf8(file.content.clone())?),
            None => Err(anyhow!("file not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path.to_path_buf(), MockFile::new(contents.to_vec()));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let file = files
            .remove(from)
            .ok_or_else(|| anyhow!("rename source not found: {:?}", from))?;
        files.insert(to.to_path_buf(), file);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.contains_key(path)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .map(|f| f.modified)
            .ok_or_else(|| anyhow!("file not found: {:?}", path))
    }

    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        if files.contains_key(path) {
            return Ok(false);
        }
        files.insert(path.to_path_buf(), MockFile::new(contents.to_vec()));
        Ok(true)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }
}
