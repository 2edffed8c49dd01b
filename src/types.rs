use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical task identifier used throughout the crate.
pub type TaskId = String;

/// Priority tier of a task. Declaration order is scheduling order:
/// `High` sorts before `Medium` before `Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!(
                "invalid priority: {other} (expected \"high\", \"medium\" or \"low\")"
            )),
        }
    }
}

/// What a checkpoint resolves to when nobody is at a terminal to answer it.
///
/// - `Skip`: block the task and keep going with the rest of the run (default).
/// - `Proceed`: approve the task and execute it.
/// - `Pause`: suspend the run; it must be resumed after a human resolves the
///   checkpoint out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonInteractiveDefault {
    Skip,
    Proceed,
    Pause,
}

impl Default for NonInteractiveDefault {
    fn default() -> Self {
        NonInteractiveDefault::Skip
    }
}

impl NonInteractiveDefault {
    /// The checkpoint option label this default picks.
    pub fn label(self) -> &'static str {
        match self {
            NonInteractiveDefault::Skip => "skip",
            NonInteractiveDefault::Proceed => "proceed",
            NonInteractiveDefault::Pause => "pause",
        }
    }
}

impl FromStr for NonInteractiveDefault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(NonInteractiveDefault::Skip),
            "proceed" => Ok(NonInteractiveDefault::Proceed),
            "pause" => Ok(NonInteractiveDefault::Pause),
            other => Err(format!(
                "invalid non_interactive_default: {other} (expected \"skip\", \"proceed\" or \"pause\")"
            )),
        }
    }
}

/// Parse a duration string like `"250ms"`, `"30s"`, `"5m"` or `"4h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
