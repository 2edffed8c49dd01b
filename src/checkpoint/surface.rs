// src/checkpoint/surface.rs

//! Where checkpoints are shown to a human.

use std::io::{self, BufRead, IsTerminal, Write};

use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::errors::Result;
use crate::types::NonInteractiveDefault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDecision {
    pub option: String,
    pub notes: Option<String>,
}

impl HumanDecision {
    pub fn new(option: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            notes: None,
        }
    }
}

/// Presents a rendered checkpoint and returns the chosen option.
pub trait DecisionSurface: Send + Sync {
    fn decide(&self, checkpoint: &Checkpoint) -> Result<HumanDecision>;
}

/// Resolves every checkpoint to a fixed default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractiveSurface {
    default: NonInteractiveDefault,
}

impl NonInteractiveSurface {
    pub fn new(default: NonInteractiveDefault) -> Self {
        Self { default }
    }
}

impl DecisionSurface for NonInteractiveSurface {
    fn decide(&self, checkpoint: &Checkpoint) -> Result<HumanDecision> {
        Ok(default_decision(checkpoint, self.default))
    }
}

/// Prompts on the controlling terminal; falls back to the configured
/// default when stdin is not a terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalSurface {
    fallback: NonInteractiveDefault,
}

impl TerminalSurface {
    pub fn new(fallback: NonInteractiveDefault) -> Self {
        Self { fallback }
    }
}

impl DecisionSurface for TerminalSurface {
    fn decide(&self, checkpoint: &Checkpoint) -> Result<HumanDecision> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(default_decision(checkpoint, self.fallback));
        }

        let mut stderr = io::stderr();
        write!(stderr, "\n{}", checkpoint.render())?;

        let mut lines = stdin.lock().lines();
        loop {
            write!(stderr, "choose an option [1-{}]: ", checkpoint.options.len())?;
            stderr.flush()?;
            let Some(line) = lines.next().transpose()? else {
                // EOF on the terminal: treat like a detached session.
                return Ok(default_decision(checkpoint, self.fallback));
            };
            let Some(option) = parse_choice(checkpoint, line.trim()) else {
                writeln!(stderr, "unrecognised choice '{}'", line.trim())?;
                continue;
            };

            write!(stderr, "notes (optional): ")?;
            stderr.flush()?;
            let notes = lines
                .next()
                .transpose()?
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            return Ok(HumanDecision { option, notes });
        }
    }
}

/// Accepts a 1-based option number or an option label.
fn parse_choice(checkpoint: &Checkpoint, input: &str) -> Option<String> {
    if let Ok(n) = input.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| checkpoint.options.get(i))
            .map(|o| o.label.clone());
    }
    checkpoint
        .options
        .iter()
        .find(|o| o.label.eq_ignore_ascii_case(input))
        .map(|o| o.label.clone())
}

fn default_decision(checkpoint: &Checkpoint, default: NonInteractiveDefault) -> HumanDecision {
    let label = default.label();
    let option = if checkpoint.has_option(label) {
        label.to_string()
    } else {
        let fallback = checkpoint
            .recommended()
            .or_else(|| checkpoint.options.first())
            .map(|o| o.label.clone())
            .unwrap_or_else(|| label.to_string());
        warn!(
            checkpoint = %checkpoint.checkpoint_id,
            default = label,
            chosen = %fallback,
            "non-interactive default not offered; using recommended option"
        );
        fallback
    };
    info!(
        checkpoint = %checkpoint.checkpoint_id,
        task = %checkpoint.task_id,
        option = %option,
        "checkpoint resolved non-interactively"
    );
    HumanDecision {
        option,
        notes: Some("non-interactive default".to_string()),
    }
}
