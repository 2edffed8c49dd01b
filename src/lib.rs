// src/lib.rs

pub mod admission;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod recovery;
pub mod session;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::checkpoint::{DecisionSurface, NonInteractiveSurface, TerminalSurface};
use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, default_config_path, load_and_validate};
use crate::dag::{DependencyGraph, Task};
use crate::engine::{Collaborators, Runner};
use crate::exec::ShellExecutor;
use crate::fs::RealFileSystem;
use crate::recovery::{AdvisoryAnalyzer, CommandAnalyzer, EscalatingAnalyzer};
use crate::session::LockManager;
use crate::store::{FileStateStore, StateStore};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the file-backed state store and session table
/// - shell executor, advisory analyzer and decision surface
/// - the runner, with Ctrl-C wired to its cancel handle
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = load_and_validate(&config_path)?;
    let state_dir = state_dir(&cfg, &config_path);
    let store = FileStateStore::new(RealFileSystem, state_dir);
    debug!(config = ?config_path, state_dir = ?store.root(), "configuration loaded");

    match args.command {
        Command::Run {
            dry_run,
            run_id,
            non_interactive,
        } => {
            if dry_run {
                print_dry_run(&cfg)?;
                return Ok(());
            }
            let collab = collaborators(&cfg, &store, non_interactive);
            let runner = Runner::start(&cfg, run_id, collab)?;
            drive(runner).await
        }
        Command::Resume {
            run_id,
            budget,
            non_interactive,
        } => {
            if let Some(budget) = budget {
                anyhow::ensure!(
                    budget.is_finite() && budget >= 0.0,
                    "--budget must be a non-negative number"
                );
                cfg.run.budget = budget;
            }
            let collab = collaborators(&cfg, &store, non_interactive);
            let runner = Runner::resume(&cfg, &run_id, collab)?;
            drive(runner).await
        }
        Command::Unblock { run_id, task_id } => {
            let requeued = engine::unblock_task(&store, &run_id, &task_id)?;
            println!("requeued: {}", requeued.join(", "));
            println!("continue with: workdag resume {run_id}");
            Ok(())
        }
        Command::Checkpoints { pending } => {
            for checkpoint in store.list_checkpoints()? {
                if pending && checkpoint.is_resolved() {
                    continue;
                }
                println!("{}", checkpoint.render());
            }
            Ok(())
        }
        Command::Resolve {
            checkpoint_id,
            option,
            notes,
        } => {
            let checkpoint = engine::resolve_checkpoint(&store, &checkpoint_id, &option, notes)?;
            match checkpoint.resolution() {
                Some(r) => println!("checkpoint {checkpoint_id} resolved: {}", r.option),
                None => println!("checkpoint {checkpoint_id} left pending"),
            }
            println!("continue with: workdag resume {}", checkpoint.run_id);
            Ok(())
        }
        Command::Sessions { sweep } => {
            let locks = LockManager::new(store.session_store(), cfg.sessions.ttl)
                .with_retention(cfg.sessions.retention);
            if sweep {
                let interrupted = locks.interrupt_stale()?;
                println!("interrupted {} stale session(s)", interrupted.len());
            }
            let now = chrono::Utc::now();
            for s in locks.sessions()? {
                println!(
                    "{}  {:<11} task={} holder={} heartbeat {}s ago",
                    s.session_id,
                    s.status.to_string(),
                    s.task_id,
                    s.holder_identity,
                    s.heartbeat_age(now).as_secs()
                );
            }
            Ok(())
        }
        Command::Status { run_id } => {
            print!("{}", engine::run_status(&store, &run_id)?);
            Ok(())
        }
    }
}

async fn drive(mut runner: Runner) -> Result<()> {
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received; cancelling run");
        cancel.cancel();
    });

    let summary = runner.run().await?;
    print!("{summary}");
    if let Some(checkpoint_id) = runner.pending_checkpoint() {
        println!(
            "resolve with: workdag resolve {checkpoint_id} <proceed|skip>, then workdag resume {}",
            runner.run_id()
        );
    }
    Ok(())
}

fn collaborators(
    cfg: &ConfigFile,
    store: &FileStateStore<RealFileSystem>,
    non_interactive: bool,
) -> Collaborators {
    let analyzer: Arc<dyn AdvisoryAnalyzer> = match &cfg.executor.analyzer_cmd {
        Some(cmd) => Arc::new(CommandAnalyzer::new(cmd.clone())),
        None => Arc::new(EscalatingAnalyzer),
    };
    let default = cfg.run.non_interactive_default;
    let surface: Arc<dyn DecisionSurface> = if non_interactive {
        Arc::new(NonInteractiveSurface::new(default))
    } else {
        Arc::new(TerminalSurface::new(default))
    };

    Collaborators {
        executor: Arc::new(ShellExecutor::new(cfg.executor.timeout)),
        analyzer,
        surface,
        sessions: store.session_store(),
        store: Arc::new(store.clone()),
    }
}

/// `[run].state_dir`, relative to the config file's directory.
fn state_dir(cfg: &ConfigFile, config_path: &Path) -> PathBuf {
    if cfg.run.state_dir.is_absolute() {
        return cfg.run.state_dir.clone();
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(&cfg.run.state_dir),
        _ => cfg.run.state_dir.clone(),
    }
}

/// Dry-run output: tasks in execution order with their admission inputs.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let tasks: Vec<Task> = cfg
        .task
        .iter()
        .map(|(id, tc)| Task::from_config(id.clone(), tc))
        .collect();
    let graph = DependencyGraph::from_tasks(&tasks)?;
    let order = graph
        .topological_order()
        .ok_or_else(|| anyhow::anyhow!("dependency graph has a cycle"))?;

    println!("workdag dry-run");
    println!(
        "  budget = {:.2}, max_checkpoints = {}, non_interactive_default = {}",
        cfg.run.budget,
        cfg.run.max_checkpoints,
        cfg.run.non_interactive_default.label()
    );
    println!();

    println!("tasks ({}), in dependency order:", order.len());
    for id in &order {
        let Some(task) = tasks.iter().find(|t| &t.id == id) else {
            continue;
        };
        println!(
            "  - {} [{}] cost {:.2}",
            task.id, task.priority, task.estimated_cost
        );
        if let Some(cmd) = &task.command {
            println!("      command: {cmd}");
        }
        if !task.dependencies.is_empty() {
            let deps: Vec<&str> = task.dependencies.iter().map(String::as_str).collect();
            println!("      after: {}", deps.join(", "));
        }
        if !task.files.is_empty() {
            println!("      files: {}", task.files.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
