// tests/config_validation.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, TaskConfigBuilder};

use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;

use workdag::config::{ConfigFile, RawConfigFile, load_and_validate};
use workdag::errors::WorkdagError;
use workdag::types::{NonInteractiveDefault, Priority, parse_duration};

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Workdag.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

fn config_error(raw: RawConfigFile) -> String {
    match ConfigFile::try_from(raw) {
        Err(WorkdagError::ConfigError(msg)) => msg,
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn loads_a_full_file_and_applies_defaults() {
    let (_dir, path) = write_config(
        r#"
[run]
budget = 40.0
non_interactive_default = "pause"

[sessions]
ttl = "90s"

[risk]
core_paths = ["migrations/**"]

[recovery]
backoff_base = "250ms"
analyzer_cmd = "./advise.sh"

[task.schema]
description = "Create the orders table"
command = "psql -f schema.sql"
priority = "high"
estimated_cost = 4.5
files = ["migrations/001_orders.sql"]

[task.api]
description = "Expose the orders endpoint"
after = ["schema"]
kind = "endpoint"
"#,
    );

    let cfg = load_and_validate(&path).unwrap();

    assert_eq!(cfg.run.budget, 40.0);
    assert_eq!(cfg.run.max_checkpoints, 3);
    assert_eq!(cfg.run.non_interactive_default, NonInteractiveDefault::Pause);
    assert_eq!(cfg.sessions.ttl, Duration::from_secs(90));
    assert_eq!(cfg.sessions.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(cfg.sessions.retention, Duration::from_secs(24 * 3600));
    assert_eq!(cfg.recovery.transient_max, 3);
    assert_eq!(cfg.recovery.alternative_max, 2);
    assert_eq!(cfg.recovery.backoff.base, Duration::from_millis(250));
    assert_eq!(cfg.recovery.backoff.max, Duration::from_secs(60));
    assert_eq!(cfg.executor.timeout, Duration::from_secs(30 * 60));
    assert_eq!(cfg.executor.analyzer_cmd.as_deref(), Some("./advise.sh"));
    assert!(cfg.risk.core_paths.is_match("migrations/001_orders.sql"));
    assert!(!cfg.risk.core_paths.is_match("src/main.rs"));

    let schema = &cfg.task["schema"];
    assert_eq!(schema.priority, Priority::High);
    assert_eq!(schema.estimated_cost, 4.5);
    let api = &cfg.task["api"];
    assert_eq!(api.after, vec!["schema"]);
    assert_eq!(api.priority, Priority::Medium);
    assert_eq!(api.kind.as_deref(), Some("endpoint"));
}

#[test]
fn malformed_toml_is_reported_as_a_parse_error() {
    let (_dir, path) = write_config("[task.a\ndescription = 1");
    assert!(matches!(
        load_and_validate(&path),
        Err(WorkdagError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_and_validate(dir.path().join("nope.toml")),
        Err(WorkdagError::IoError(_))
    ));
}

#[test]
fn cycles_are_rejected_with_their_path() {
    let raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").after("c").build())
        .with_task("b", TaskConfigBuilder::new("b").after("a").build())
        .with_task("c", TaskConfigBuilder::new("c").after("b").build())
        .with_task("d", TaskConfigBuilder::new("d").build())
        .raw();

    match ConfigFile::try_from(raw) {
        Err(WorkdagError::DagCycle(path)) => {
            let members: BTreeSet<&str> = path.iter().map(String::as_str).collect();
            assert_eq!(members, BTreeSet::from(["a", "b", "c"]));
            let message = WorkdagError::DagCycle(path.clone()).to_string();
            assert!(message.contains(" -> "), "{message}");
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn unknown_and_self_dependencies_are_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").after("ghost").build())
        .raw();
    assert!(config_error(raw).contains("ghost"));

    let raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").after("a").build())
        .raw();
    assert!(config_error(raw).contains("itself"));
}

#[test]
fn an_empty_task_table_is_rejected() {
    assert!(config_error(RawConfigFile::default()).contains("at least one"));
}

#[test]
fn risk_settings_are_checked() {
    let mut raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    raw.risk.weights.cost = 0.5;
    assert!(config_error(raw).contains("sum to 1.0"));

    let mut raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    raw.risk.checkpoint_threshold = 0.9;
    raw.risk.block_threshold = 0.8;
    assert!(config_error(raw).contains("thresholds"));

    let mut raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    raw.risk.core_paths = vec!["src/[".to_string()];
    assert!(config_error(raw).contains("core_paths"));
}

#[test]
fn recovery_and_cost_settings_are_checked() {
    let mut raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    raw.recovery.transient_max = 0;
    assert!(config_error(raw).contains("transient_max"));

    let mut raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    raw.recovery.jitter = 1.5;
    assert!(config_error(raw).contains("jitter"));

    let raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").cost(-1.0).build())
        .raw();
    assert!(config_error(raw).contains("estimated_cost"));

    let raw = ConfigFileBuilder::new()
        .budget(f64::NAN)
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    assert!(config_error(raw).contains("budget"));
}

#[test]
fn bad_durations_name_the_field() {
    let raw = ConfigFileBuilder::new()
        .session_ttl("forever")
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    assert!(config_error(raw).contains("sessions.ttl"));

    let mut raw = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").build())
        .raw();
    raw.sessions.retention = "a week".to_string();
    assert!(config_error(raw).contains("sessions.retention"));
}

#[test]
fn duration_suffixes() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 30s "), Ok(Duration::from_secs(30)));
    assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
    assert_eq!(parse_duration("4h"), Ok(Duration::from_secs(4 * 3600)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("3d").is_err());
}
