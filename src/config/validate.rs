// src/config/validate.rs

use std::time::Duration;

use globset::{Glob, GlobSetBuilder};

use crate::admission::RiskConfig;
use crate::config::model::{
    ConfigFile, ExecutorSettings, RawConfigFile, RecoverySection, RiskSection, SessionSettings,
};
use crate::dag::{DependencyGraph, Task};
use crate::errors::{Result, WorkdagError};
use crate::recovery::{BackoffPolicy, RecoveryPolicy};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WorkdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let sessions = SessionSettings {
            ttl: duration_field("sessions.ttl", &raw.sessions.ttl)?,
            heartbeat_interval: duration_field(
                "sessions.heartbeat_interval",
                &raw.sessions.heartbeat_interval,
            )?,
            retention: duration_field("sessions.retention", &raw.sessions.retention)?,
        };
        let risk = build_risk_config(&raw.risk)?;
        let recovery = build_recovery_policy(&raw.recovery)?;
        let executor = ExecutorSettings {
            timeout: duration_field("executor.timeout", &raw.executor.timeout)?,
            analyzer_cmd: raw.recovery.analyzer_cmd.clone(),
        };

        Ok(ConfigFile::new_unchecked(
            raw.run, sessions, risk, recovery, executor, raw.task,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_run_section(cfg)?;
    validate_tasks(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(WorkdagError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_run_section(cfg: &RawConfigFile) -> Result<()> {
    if !cfg.run.budget.is_finite() || cfg.run.budget < 0.0 {
        return Err(WorkdagError::ConfigError(format!(
            "[run].budget must be a non-negative number (got {})",
            cfg.run.budget
        )));
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (id, task) in cfg.task.iter() {
        if !task.estimated_cost.is_finite() || task.estimated_cost < 0.0 {
            return Err(WorkdagError::ConfigError(format!(
                "task '{}' has invalid estimated_cost {}",
                id, task.estimated_cost
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let tasks: Vec<Task> = cfg
        .task
        .iter()
        .map(|(id, tc)| Task::from_config(id.clone(), tc))
        .collect();

    // Unknown and self dependencies surface as ConfigError from here.
    let graph = DependencyGraph::from_tasks(&tasks)?;

    match graph.detect_cycle() {
        Some(cycle) => Err(WorkdagError::DagCycle(cycle)),
        None => Ok(()),
    }
}

fn build_risk_config(section: &RiskSection) -> Result<RiskConfig> {
    let w = &section.weights;
    let parts = [w.cost, w.scope, w.reversibility, w.precedent, w.confidence];
    if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(WorkdagError::ConfigError(
            "[risk].weights must all be non-negative".to_string(),
        ));
    }
    let sum: f64 = parts.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(WorkdagError::ConfigError(format!(
            "[risk].weights must sum to 1.0 (got {sum})"
        )));
    }

    let (cp, block) = (section.checkpoint_threshold, section.block_threshold);
    if !(0.0 < cp && cp < block && block <= 1.0) {
        return Err(WorkdagError::ConfigError(format!(
            "[risk] thresholds must satisfy 0 < checkpoint_threshold < block_threshold <= 1 (got {cp} / {block})"
        )));
    }

    if section.scope_saturation == 0 {
        return Err(WorkdagError::ConfigError(
            "[risk].scope_saturation must be >= 1".to_string(),
        ));
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in &section.core_paths {
        let glob = Glob::new(pattern).map_err(|e| {
            WorkdagError::ConfigError(format!("invalid [risk].core_paths glob '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    let core_paths = builder.build().map_err(|e| {
        WorkdagError::ConfigError(format!("building [risk].core_paths: {e}"))
    })?;

    Ok(RiskConfig {
        weights: section.weights,
        checkpoint_threshold: cp,
        block_threshold: block,
        core_paths,
        scope_saturation: section.scope_saturation,
        core_path_penalty: section.core_path_penalty.clamp(0.0, 1.0),
        ..RiskConfig::default()
    })
}

fn build_recovery_policy(section: &RecoverySection) -> Result<RecoveryPolicy> {
    if section.transient_max == 0 {
        return Err(WorkdagError::ConfigError(
            "[recovery].transient_max must be >= 1 (got 0)".to_string(),
        ));
    }
    if !section.backoff_multiplier.is_finite() || section.backoff_multiplier < 1.0 {
        return Err(WorkdagError::ConfigError(format!(
            "[recovery].backoff_multiplier must be >= 1.0 (got {})",
            section.backoff_multiplier
        )));
    }
    if !(0.0..=1.0).contains(&section.jitter) {
        return Err(WorkdagError::ConfigError(format!(
            "[recovery].jitter must be within 0.0..=1.0 (got {})",
            section.jitter
        )));
    }

    Ok(RecoveryPolicy {
        transient_max: section.transient_max,
        alternative_max: section.alternative_max,
        backoff: BackoffPolicy {
            base: duration_field("recovery.backoff_base", &section.backoff_base)?,
            multiplier: section.backoff_multiplier,
            max: duration_field("recovery.backoff_max", &section.backoff_max)?,
            jitter: section.jitter,
        },
        analyzer_timeout: duration_field("recovery.analyzer_timeout", &section.analyzer_timeout)?,
    })
}

fn duration_field(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| WorkdagError::ConfigError(format!("invalid [{name}] duration: {e}")))
}
