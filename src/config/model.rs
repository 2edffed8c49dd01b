// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::admission::{RiskConfig, RiskWeights};
use crate::recovery::RecoveryPolicy;
use crate::types::{NonInteractiveDefault, Priority};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [run]
/// budget = 100.0
/// max_checkpoints = 3
///
/// [risk]
/// core_paths = ["src/core/**"]
///
/// [task.parser]
/// description = "Add the expression parser"
/// command = "make parser"
/// priority = "high"
/// estimated_cost = 12.5
///
/// [task.docs]
/// command = "make docs"
/// after = ["parser"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub sessions: SessionsSection,

    #[serde(default)]
    pub risk: RiskSection,

    #[serde(default)]
    pub recovery: RecoverySection,

    #[serde(default)]
    pub executor: ExecutorSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration; build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub run: RunSection,
    pub sessions: SessionSettings,
    pub risk: RiskConfig,
    pub recovery: RecoveryPolicy,
    pub executor: ExecutorSettings,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        run: RunSection,
        sessions: SessionSettings,
        risk: RiskConfig,
        recovery: RecoveryPolicy,
        executor: ExecutorSettings,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            run,
            sessions,
            risk,
            recovery,
            executor,
            task,
        }
    }
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    /// Total cost ceiling for one run, in abstract currency units.
    #[serde(default = "default_budget")]
    pub budget: f64,

    /// How many interactive checkpoints a run may raise before the
    /// auto-resolve fallback kicks in.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: u32,

    /// What a checkpoint resolves to without a terminal attached.
    #[serde(default)]
    pub non_interactive_default: NonInteractiveDefault,

    /// Where runs, sessions, checkpoints and history are persisted.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Holder identity for task claims. Defaults to `<run_id>@<hostname>`,
    /// which stays stable across a crash and resume of the same run.
    #[serde(default)]
    pub holder: Option<String>,
}

fn default_budget() -> f64 {
    100.0
}

fn default_max_checkpoints() -> u32 {
    3
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".workdag")
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            max_checkpoints: default_max_checkpoints(),
            non_interactive_default: NonInteractiveDefault::default(),
            state_dir: default_state_dir(),
            holder: None,
        }
    }
}

/// `[sessions]` section. Durations use `ms`/`s`/`m`/`h` suffixes.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_ttl")]
    pub ttl: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: String,
    /// How long COMPLETE and INTERRUPTED sessions are kept.
    #[serde(default = "default_retention")]
    pub retention: String,
}

fn default_ttl() -> String {
    "4h".to_string()
}

fn default_heartbeat_interval() -> String {
    "30s".to_string()
}

fn default_retention() -> String {
    "24h".to_string()
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            heartbeat_interval: default_heartbeat_interval(),
            retention: default_retention(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub heartbeat_interval: Duration,
    pub retention: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(4 * 60 * 60),
            heartbeat_interval: Duration::from_secs(30),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// `[risk]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default = "default_checkpoint_threshold")]
    pub checkpoint_threshold: f64,
    #[serde(default = "default_block_threshold")]
    pub block_threshold: f64,
    /// Globs marking sensitive paths; any match adds `core_path_penalty`.
    #[serde(default)]
    pub core_paths: Vec<String>,
    /// File count at which the count-based scope score saturates.
    #[serde(default = "default_scope_saturation")]
    pub scope_saturation: u32,
    #[serde(default = "default_core_path_penalty")]
    pub core_path_penalty: f64,
}

fn default_checkpoint_threshold() -> f64 {
    0.5
}

fn default_block_threshold() -> f64 {
    0.8
}

fn default_scope_saturation() -> u32 {
    20
}

fn default_core_path_penalty() -> f64 {
    0.3
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            checkpoint_threshold: default_checkpoint_threshold(),
            block_threshold: default_block_threshold(),
            core_paths: Vec::new(),
            scope_saturation: default_scope_saturation(),
            core_path_penalty: default_core_path_penalty(),
        }
    }
}

/// `[recovery]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_transient_max")]
    pub transient_max: u32,
    #[serde(default = "default_alternative_max")]
    pub alternative_max: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: String,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max: String,
    /// Fractional jitter applied to each delay, e.g. `0.2` = ±20%.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_analyzer_timeout")]
    pub analyzer_timeout: String,
    /// Command consulted as the advisory analyzer. Without one, systematic
    /// failures escalate as soon as the transient tier is spent.
    #[serde(default)]
    pub analyzer_cmd: Option<String>,
}

fn default_transient_max() -> u32 {
    3
}

fn default_alternative_max() -> u32 {
    2
}

fn default_backoff_base() -> String {
    "2s".to_string()
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max() -> String {
    "60s".to_string()
}

fn default_jitter() -> f64 {
    0.2
}

fn default_analyzer_timeout() -> String {
    "30s".to_string()
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            transient_max: default_transient_max(),
            alternative_max: default_alternative_max(),
            backoff_base: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max: default_backoff_max(),
            jitter: default_jitter(),
            analyzer_timeout: default_analyzer_timeout(),
            analyzer_cmd: None,
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// Wall-clock limit per execution; hitting it counts as a transient error.
    #[serde(default = "default_executor_timeout")]
    pub timeout: String,
}

fn default_executor_timeout() -> String {
    "30m".to_string()
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            timeout: default_executor_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub timeout: Duration,
    pub analyzer_cmd: Option<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            analyzer_cmd: None,
        }
    }
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskConfig {
    /// What the work is; also feeds the reversibility heuristic.
    #[serde(default)]
    pub description: String,

    /// Shell command the work executor runs.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Dependency list: this task waits for every task listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub estimated_cost: f64,

    /// Resources the task touches (paths), for the scope factor.
    #[serde(default)]
    pub files: Vec<String>,

    /// Similarity label for precedent/confidence history.
    #[serde(default)]
    pub kind: Option<String>,
}
