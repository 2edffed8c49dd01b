//! A run wired to scripted collaborators over an in-memory state directory.

use std::sync::Arc;

use workdag::config::ConfigFile;
use workdag::engine::{Collaborators, Runner};
use workdag::errors::Result;
use workdag::fs::mock::MockFileSystem;
use workdag::store::FileStateStore;

use crate::fakes::{FixedSurface, ScriptedAnalyzer, ScriptedExecutor};

pub const STATE_DIR: &str = "/state";

pub struct Harness {
    pub fs: MockFileSystem,
    pub store: FileStateStore<MockFileSystem>,
    pub executor: Arc<ScriptedExecutor>,
    pub analyzer: Arc<ScriptedAnalyzer>,
    pub surface: Arc<FixedSurface>,
}

impl Harness {
    /// Checkpoints are answered with `proceed` unless told otherwise.
    pub fn new() -> Self {
        let fs = MockFileSystem::new();
        Self {
            store: FileStateStore::new(fs.clone(), STATE_DIR),
            fs,
            executor: ScriptedExecutor::new(),
            analyzer: ScriptedAnalyzer::new(),
            surface: FixedSurface::new("proceed"),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            executor: self.executor.clone(),
            analyzer: self.analyzer.clone(),
            surface: self.surface.clone(),
            store: Arc::new(self.store.clone()),
            sessions: self.store.session_store(),
        }
    }

    pub fn start(&self, cfg: &ConfigFile, run_id: &str) -> Result<Runner> {
        Runner::start(cfg, Some(run_id.to_string()), self.collaborators())
    }

    pub fn resume(&self, cfg: &ConfigFile, run_id: &str) -> Result<Runner> {
        Runner::resume(cfg, run_id, self.collaborators())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
