// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "WORKDAG_CONFIG";

/// Read and deserialize a workflow file without validating it.
///
/// Missing sections take their defaults here. Dependency references,
/// risk weights and durations are only checked by [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let raw: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = ?path, tasks = raw.task.len(), "workflow file parsed");
    Ok(raw)
}

/// Read a workflow file and turn it into a validated [`ConfigFile`].
///
/// Rejects unknown or self `after` references, dependency cycles (with the
/// cycle path), bad risk weights or thresholds, invalid core-path globs and
/// unparsable durations.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// `WORKDAG_CONFIG` if set, otherwise `Workdag.toml` in the current
/// directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Workdag.toml"))
}
