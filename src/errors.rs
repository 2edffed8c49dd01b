// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Cycle detected in DAG: {}", .0.join(" -> "))]
    DagCycle(Vec<String>),

    #[error("Invalid stage transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Checkpoint {0} is already resolved")]
    CheckpointAlreadyResolved(String),

    #[error("Checkpoint {checkpoint} has no option '{option}'")]
    UnknownCheckpointOption { checkpoint: String, option: String },

    #[error("Store lock busy: {0}")]
    StoreBusy(String),

    #[error("Corrupt state record: {0}")]
    StoreCorrupt(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkdagError>;
