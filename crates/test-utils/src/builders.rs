#![allow(dead_code)]

use workdag::config::{ConfigFile, RawConfigFile, TaskConfig};
use workdag::types::{NonInteractiveDefault, Priority};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the production defaults except for recovery timing, which is
/// shrunk to milliseconds so retry paths finish quickly.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.recovery.backoff_base = "1ms".to_string();
        config.recovery.backoff_max = "5ms".to_string();
        config.recovery.analyzer_timeout = "1s".to_string();
        config.sessions.heartbeat_interval = "10ms".to_string();
        Self { config }
    }

    pub fn with_task(mut self, id: &str, task: TaskConfig) -> Self {
        self.config.task.insert(id.to_string(), task);
        self
    }

    pub fn budget(mut self, budget: f64) -> Self {
        self.config.run.budget = budget;
        self
    }

    pub fn max_checkpoints(mut self, max: u32) -> Self {
        self.config.run.max_checkpoints = max;
        self
    }

    pub fn non_interactive_default(mut self, default: NonInteractiveDefault) -> Self {
        self.config.run.non_interactive_default = default;
        self
    }

    pub fn holder(mut self, holder: &str) -> Self {
        self.config.run.holder = Some(holder.to_string());
        self
    }

    pub fn session_ttl(mut self, ttl: &str) -> Self {
        self.config.sessions.ttl = ttl.to_string();
        self
    }

    pub fn recovery(mut self, transient_max: u32, alternative_max: u32) -> Self {
        self.config.recovery.transient_max = transient_max;
        self.config.recovery.alternative_max = alternative_max;
        self
    }

    pub fn backoff(mut self, base: &str, max: &str) -> Self {
        self.config.recovery.backoff_base = base.to_string();
        self.config.recovery.backoff_max = max.to_string();
        self
    }

    pub fn analyzer_timeout(mut self, timeout: &str) -> Self {
        self.config.recovery.analyzer_timeout = timeout.to_string();
        self
    }

    pub fn core_path(mut self, pattern: &str) -> Self {
        self.config.risk.core_paths.push(pattern.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(description: &str) -> Self {
        Self {
            task: TaskConfig {
                description: description.to_string(),
                ..TaskConfig::default()
            },
        }
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.task.command = Some(cmd.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.task.estimated_cost = cost;
        self
    }

    pub fn file(mut self, path: &str) -> Self {
        self.task.files.push(path.to_string());
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.task.kind = Some(kind.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
