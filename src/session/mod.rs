// src/session/mod.rs

//! Exclusive task claims shared between concurrent runs.
//!
//! - [`store`] persists the session table; the file-backed store guards
//!   every read-modify-write with a cross-process mutex.
//! - [`lock_manager`] implements claim / heartbeat / release on top of it,
//!   including stale-session reclamation.

pub mod lock_manager;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use lock_manager::{Claim, ClaimResult, LockManager};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Interrupted,
    Complete,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Paused => write!(f, "PAUSED"),
            SessionStatus::Interrupted => write!(f, "INTERRUPTED"),
            SessionStatus::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub session_id: String,
    pub task_id: String,
    pub holder_identity: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: SessionStatus,
    /// When the session was released or interrupted.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionSession {
    /// ACTIVE and PAUSED sessions both hold their task's claim.
    pub fn holds_claim(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Paused)
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.holds_claim() && self.heartbeat_age(now) > ttl
    }

    /// Leave the claim with a final status.
    pub fn end(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(now);
    }

    /// A released session that ended more than `retention` ago.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        if self.holds_claim() {
            return false;
        }
        let ended = self.ended_at.unwrap_or(self.last_heartbeat_at);
        (now - ended).to_std().is_ok_and(|age| age > retention)
    }
}

/// All session records, keyed by session id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTable {
    #[serde(default)]
    pub sessions: BTreeMap<String, ExecutionSession>,
}

impl SessionTable {
    /// Sessions currently holding a claim on `task_id`.
    pub fn holders_of<'a>(
        &'a self,
        task_id: &'a str,
    ) -> impl Iterator<Item = &'a ExecutionSession> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.task_id == task_id && s.holds_claim())
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut ExecutionSession> {
        self.sessions.get_mut(session_id)
    }

    pub fn insert(&mut self, session: ExecutionSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    /// Drop released sessions older than `retention`. Returns how many.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now, retention));
        before - self.sessions.len()
    }
}
