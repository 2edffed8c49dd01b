// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `workdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workdag",
    version,
    about = "Run a DAG of costly, failure-prone tasks under budget, risk and approval limits.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `WORKDAG_CONFIG`, or `Workdag.toml` in the current working
    /// directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Submit every configured task as a new run and execute it.
    Run {
        /// Parse + validate, print the execution order, but don't run anything.
        #[arg(long)]
        dry_run: bool,

        /// Use this run id instead of a generated one.
        #[arg(long, value_name = "ID")]
        run_id: Option<String>,

        /// Never prompt; resolve checkpoints to `[run].non_interactive_default`.
        #[arg(long)]
        non_interactive: bool,
    },

    /// Continue a persisted run.
    Resume {
        run_id: String,

        /// Raise the run's budget to this amount before continuing.
        /// Defaults to `[run].budget`; a run's budget is never lowered.
        #[arg(long, value_name = "AMOUNT")]
        budget: Option<f64>,

        /// Never prompt; resolve checkpoints to `[run].non_interactive_default`.
        #[arg(long)]
        non_interactive: bool,
    },

    /// Requeue a blocked task and everything blocked because of it.
    Unblock { run_id: String, task_id: String },

    /// List checkpoints.
    Checkpoints {
        /// Only unresolved checkpoints.
        #[arg(long)]
        pending: bool,
    },

    /// Resolve a checkpoint by option label.
    Resolve {
        checkpoint_id: String,
        option: String,
        #[arg(long)]
        notes: Option<String>,
    },

    /// List task claims.
    Sessions {
        /// Interrupt every session whose heartbeat is older than the TTL.
        #[arg(long)]
        sweep: bool,
    },

    /// Show the state of a persisted run.
    Status { run_id: String },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
