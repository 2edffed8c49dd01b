// src/admission/history.rs

//! Ledger of past task outcomes and checkpoint decisions.
//!
//! Feeds the precedent and confidence risk factors. Records are grouped by
//! [`Task::similarity_key`], so tasks sharing a `kind` share history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    Outcome {
        key: String,
        task_id: String,
        success: bool,
        recorded_at: DateTime<Utc>,
    },
    Decision {
        key: String,
        task_id: String,
        approved: bool,
        recorded_at: DateTime<Utc>,
    },
}

impl HistoryEntry {
    pub fn outcome(task: &Task, success: bool) -> Self {
        HistoryEntry::Outcome {
            key: task.similarity_key().to_string(),
            task_id: task.id.clone(),
            success,
            recorded_at: Utc::now(),
        }
    }

    pub fn decision(task: &Task, approved: bool) -> Self {
        HistoryEntry::Decision {
            key: task.similarity_key().to_string(),
            task_id: task.id.clone(),
            approved,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskHistory {
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

impl TaskHistory {
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Fraction of similar past executions that succeeded, or `None`
    /// without any.
    pub fn success_rate(&self, key: &str) -> Option<f64> {
        rate(self.entries.iter().filter_map(|e| match e {
            HistoryEntry::Outcome { key: k, success, .. } if k == key => Some(*success),
            _ => None,
        }))
    }

    /// Fraction of similar past checkpoints that a human approved, or `None`
    /// without any.
    pub fn approval_rate(&self, key: &str) -> Option<f64> {
        rate(self.entries.iter().filter_map(|e| match e {
            HistoryEntry::Decision { key: k, approved, .. } if k == key => Some(*approved),
            _ => None,
        }))
    }
}

fn rate(samples: impl Iterator<Item = bool>) -> Option<f64> {
    let (hits, total) = samples.fold((0u32, 0u32), |(h, t), s| (h + u32::from(s), t + 1));
    (total > 0).then(|| f64::from(hits) / f64::from(total))
}
