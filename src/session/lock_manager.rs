// src/session/lock_manager.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{Result, WorkdagError};
use crate::session::store::SessionStore;
use crate::session::{ExecutionSession, SessionStatus};

/// A successful claim on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub session_id: String,
    pub task_id: String,
    pub holder: String,
    /// Stale sessions interrupted to make room for this claim.
    pub reclaimed: Vec<String>,
    /// The holder already owned the task; the existing session is returned.
    pub reentrant: bool,
}

/// Outcome of [`LockManager::try_claim`]. Contention is a value, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed(Claim),
    AlreadyHeld {
        holder: String,
        session_id: String,
        age: Duration,
    },
}

impl ClaimResult {
    pub fn claim(&self) -> Option<&Claim> {
        match self {
            ClaimResult::Claimed(claim) => Some(claim),
            ClaimResult::AlreadyHeld { .. } => None,
        }
    }
}

/// How long released sessions stay in the table unless configured.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Exclusive per-task claims with heartbeats and stale reclamation.
///
/// Every operation is a single [`SessionStore::transact`] call, so the
/// check-then-write of a claim (including interrupting a stale holder) is
/// atomic across processes sharing the store. Claims and sweeps also drop
/// COMPLETE and INTERRUPTED sessions that ended more than `retention` ago.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    retention: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn try_claim(&self, task_id: &str, holder: &str) -> Result<ClaimResult> {
        self.try_claim_at(task_id, holder, Utc::now())
    }

    pub fn try_claim_at(
        &self,
        task_id: &str,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult> {
        let ttl = self.ttl;
        let retention = self.retention;
        let mut result = None;

        self.store.transact(&mut |table| {
            let pruned = table.prune(now, retention);
            if pruned > 0 {
                debug!(pruned, "pruned released sessions");
            }
            let mut reclaimed = Vec::new();
            let holder_ids: Vec<String> = table
                .holders_of(task_id)
                .map(|s| s.session_id.clone())
                .collect();

            for id in holder_ids {
                let Some(session) = table.get_mut(&id) else {
                    continue;
                };
                if session.holder_identity == holder {
                    session.last_heartbeat_at = now;
                    session.status = SessionStatus::Active;
                    result = Some(ClaimResult::Claimed(Claim {
                        session_id: session.session_id.clone(),
                        task_id: task_id.to_string(),
                        holder: holder.to_string(),
                        reclaimed: Vec::new(),
                        reentrant: true,
                    }));
                    return Ok(());
                }
                if session.is_stale(now, ttl) {
                    warn!(
                        task = %task_id,
                        session = %session.session_id,
                        stale_holder = %session.holder_identity,
                        heartbeat_age = ?session.heartbeat_age(now),
                        "interrupting stale session"
                    );
                    session.end(SessionStatus::Interrupted, now);
                    reclaimed.push(session.session_id.clone());
                    continue;
                }
                result = Some(ClaimResult::AlreadyHeld {
                    holder: session.holder_identity.clone(),
                    session_id: session.session_id.clone(),
                    age: session.age(now),
                });
                return Ok(());
            }

            let session = ExecutionSession {
                session_id: Uuid::new_v4().to_string(),
                task_id: task_id.to_string(),
                holder_identity: holder.to_string(),
                started_at: now,
                last_heartbeat_at: now,
                status: SessionStatus::Active,
                ended_at: None,
            };
            result = Some(ClaimResult::Claimed(Claim {
                session_id: session.session_id.clone(),
                task_id: task_id.to_string(),
                holder: holder.to_string(),
                reclaimed: std::mem::take(&mut reclaimed),
                reentrant: false,
            }));
            table.insert(session);
            Ok(())
        })?;

        let result = result.ok_or_else(|| {
            WorkdagError::Other(anyhow::anyhow!("session store skipped claim transaction"))
        })?;
        match &result {
            ClaimResult::Claimed(claim) => info!(
                task = %task_id,
                session = %claim.session_id,
                holder,
                reentrant = claim.reentrant,
                reclaimed = claim.reclaimed.len(),
                "task claimed"
            ),
            ClaimResult::AlreadyHeld { holder: other, age, .. } => info!(
                task = %task_id,
                holder = %other,
                ?age,
                "task already held elsewhere"
            ),
        }
        Ok(result)
    }

    /// Refresh a session's heartbeat. Returns `false` when the session no
    /// longer holds its claim (it was released or reclaimed as stale).
    pub fn heartbeat(&self, session_id: &str) -> Result<bool> {
        self.heartbeat_at(session_id, Utc::now())
    }

    pub fn heartbeat_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut holds = false;
        self.update(session_id, |session| {
            holds = session.holds_claim();
            if holds {
                session.last_heartbeat_at = now;
            }
        })?;
        debug!(session = %session_id, holds, "heartbeat");
        Ok(holds)
    }

    /// Mark a session `COMPLETE` or `INTERRUPTED`.
    ///
    /// A session that already lost its claim keeps the status it ended
    /// with. Returns whether this call released it.
    pub fn release(&self, session_id: &str, final_status: SessionStatus) -> Result<bool> {
        let now = Utc::now();
        let mut released = false;
        let mut previous = final_status;
        self.update(session_id, |session| {
            released = session.holds_claim();
            previous = session.status;
            if released {
                session.end(final_status, now);
            }
        })?;
        if released {
            info!(session = %session_id, status = %final_status, "session released");
        } else {
            warn!(
                session = %session_id,
                status = %previous,
                requested = %final_status,
                "session had already lost its claim"
            );
        }
        Ok(released)
    }

    pub fn sessions(&self) -> Result<Vec<ExecutionSession>> {
        Ok(self.store.snapshot()?.sessions.into_values().collect())
    }

    /// Interrupt every claim-holding session whose heartbeat is older than
    /// the TTL. Returns the interrupted session ids.
    pub fn interrupt_stale(&self) -> Result<Vec<String>> {
        self.interrupt_stale_at(Utc::now())
    }

    pub fn interrupt_stale_at(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let ttl = self.ttl;
        let retention = self.retention;
        let mut interrupted = Vec::new();
        let mut pruned = 0;
        self.store.transact(&mut |table| {
            interrupted.clear();
            pruned = table.prune(now, retention);
            for session in table.sessions.values_mut() {
                if session.is_stale(now, ttl) {
                    session.end(SessionStatus::Interrupted, now);
                    interrupted.push(session.session_id.clone());
                }
            }
            Ok(())
        })?;
        if !interrupted.is_empty() {
            warn!(count = interrupted.len(), "interrupted stale sessions");
        }
        if pruned > 0 {
            info!(pruned, "pruned released sessions");
        }
        Ok(interrupted)
    }

    fn update(&self, session_id: &str, mut f: impl FnMut(&mut ExecutionSession)) -> Result<()> {
        self.store.transact(&mut |table| {
            let session = table
                .get_mut(session_id)
                .ok_or_else(|| WorkdagError::SessionNotFound(session_id.to_string()))?;
            f(session);
            Ok(())
        })
    }
}
