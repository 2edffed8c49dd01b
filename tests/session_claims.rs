// tests/session_claims.rs

mod common;
use crate::common::init_tracing;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use workdag::fs::RealFileSystem;
use workdag::session::{
    ClaimResult, FileSessionStore, LockManager, MemorySessionStore, SessionStatus, SessionStore,
};

const TTL: Duration = Duration::from_secs(60);

fn memory_locks() -> LockManager {
    LockManager::new(Arc::new(MemorySessionStore::new()), TTL)
}

#[test]
fn concurrent_claims_through_the_file_store_have_exactly_one_winner() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            // Independent store handles on one directory, like separate processes.
            let store: Arc<dyn SessionStore> =
                Arc::new(FileSessionStore::new(RealFileSystem, dir.path()));
            let locks = LockManager::new(store, TTL);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                locks.try_claim("deploy", &format!("worker-{i}")).unwrap()
            })
        })
        .collect();

    let results: Vec<ClaimResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(ClaimResult::claim).collect();
    assert_eq!(winners.len(), 1, "{results:?}");

    let winner = &winners[0].holder;
    for result in &results {
        if let ClaimResult::AlreadyHeld { holder, .. } = result {
            assert_eq!(holder, winner);
        }
    }

    let locks = LockManager::new(
        Arc::new(FileSessionStore::new(RealFileSystem, dir.path())),
        TTL,
    );
    let active: Vec<_> = locks
        .sessions()
        .unwrap()
        .into_iter()
        .filter(|s| s.holds_claim())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(&active[0].holder_identity, winner);
}

#[test]
fn contention_reports_the_first_holder_and_its_age() {
    let locks = memory_locks();
    let t0 = Utc::now();
    locks.try_claim_at("migrate", "alice", t0).unwrap();

    let later = t0 + chrono::Duration::seconds(20);
    match locks.try_claim_at("migrate", "bob", later).unwrap() {
        ClaimResult::AlreadyHeld { holder, age, .. } => {
            assert_eq!(holder, "alice");
            assert_eq!(age, Duration::from_secs(20));
        }
        other => panic!("expected contention, got {other:?}"),
    }
}

#[test]
fn a_stale_holder_is_reclaimed_but_a_fresh_one_is_not() {
    let locks = memory_locks();
    let t0 = Utc::now();
    let first = locks.try_claim_at("index", "crashed", t0).unwrap();
    let first_session = first.claim().unwrap().session_id.clone();

    // Heartbeat is 30s old: still within the TTL.
    let fresh = t0 + chrono::Duration::seconds(30);
    assert!(matches!(
        locks.try_claim_at("index", "rescuer", fresh).unwrap(),
        ClaimResult::AlreadyHeld { .. }
    ));

    let stale = t0 + chrono::Duration::seconds(61);
    let claim = match locks.try_claim_at("index", "rescuer", stale).unwrap() {
        ClaimResult::Claimed(claim) => claim,
        other => panic!("expected reclaim, got {other:?}"),
    };
    assert_eq!(claim.reclaimed, vec![first_session.clone()]);
    assert!(!claim.reentrant);

    let old = locks
        .sessions()
        .unwrap()
        .into_iter()
        .find(|s| s.session_id == first_session)
        .unwrap();
    assert_eq!(old.status, SessionStatus::Interrupted);
    // The interrupted holder finds out on its next heartbeat.
    assert!(!locks.heartbeat_at(&first_session, stale).unwrap());
}

#[test]
fn heartbeats_keep_a_claim_alive() {
    let locks = memory_locks();
    let t0 = Utc::now();
    let session = locks
        .try_claim_at("build", "alice", t0)
        .unwrap()
        .claim()
        .unwrap()
        .session_id
        .clone();

    let t1 = t0 + chrono::Duration::seconds(50);
    assert!(locks.heartbeat_at(&session, t1).unwrap());

    let t2 = t0 + chrono::Duration::seconds(100);
    assert!(matches!(
        locks.try_claim_at("build", "bob", t2).unwrap(),
        ClaimResult::AlreadyHeld { .. }
    ));
}

#[test]
fn the_same_holder_reclaims_its_own_session() {
    let locks = memory_locks();
    let first = locks.try_claim("lint", "run-1@host").unwrap();
    let again = locks.try_claim("lint", "run-1@host").unwrap();

    let (first, again) = (first.claim().unwrap(), again.claim().unwrap());
    assert!(again.reentrant);
    assert_eq!(first.session_id, again.session_id);
    assert_eq!(locks.sessions().unwrap().len(), 1);
}

#[test]
fn releasing_a_session_frees_its_task() {
    let locks = memory_locks();
    let session = locks
        .try_claim("docs", "alice")
        .unwrap()
        .claim()
        .unwrap()
        .session_id
        .clone();
    assert!(matches!(
        locks.try_claim("docs", "bob").unwrap(),
        ClaimResult::AlreadyHeld { .. }
    ));

    assert!(locks.release(&session, SessionStatus::Complete).unwrap());
    assert!(locks.try_claim("docs", "bob").unwrap().claim().is_some());
    assert!(locks.release("no-such-session", SessionStatus::Complete).is_err());
}

#[test]
fn a_reclaimed_session_stays_interrupted_when_its_holder_finishes() {
    let locks = memory_locks();
    let t0 = Utc::now();
    let slow = locks
        .try_claim_at("render", "slow-run", t0)
        .unwrap()
        .claim()
        .unwrap()
        .session_id
        .clone();
    let rescuer = t0 + chrono::Duration::seconds(61);
    let claim = locks.try_claim_at("render", "rescuer", rescuer).unwrap();
    assert_eq!(claim.claim().unwrap().reclaimed, vec![slow.clone()]);

    // The slow holder's executor finishes afterwards and reports success.
    assert!(!locks.release(&slow, SessionStatus::Complete).unwrap());

    let sessions = locks.sessions().unwrap();
    let old = sessions.iter().find(|s| s.session_id == slow).unwrap();
    assert_eq!(old.status, SessionStatus::Interrupted);
    let new = sessions.iter().find(|s| s.session_id != slow).unwrap();
    assert_eq!(new.status, SessionStatus::Active);
}

#[test]
fn released_sessions_are_pruned_after_the_retention_window() {
    init_tracing();
    let locks = memory_locks().with_retention(Duration::from_secs(3600));
    let t0 = Utc::now();
    let done = locks
        .try_claim_at("a", "x", t0)
        .unwrap()
        .claim()
        .unwrap()
        .session_id
        .clone();
    locks.release(&done, SessionStatus::Complete).unwrap();
    let abandoned = locks
        .try_claim_at("b", "y", t0)
        .unwrap()
        .claim()
        .unwrap()
        .session_id
        .clone();

    // Within the window the finished session is still listed.
    locks
        .try_claim_at("c", "z", t0 + chrono::Duration::minutes(30))
        .unwrap();
    assert_eq!(locks.sessions().unwrap().len(), 3);

    // Past it, only the finished one goes; a stale holder is never pruned.
    let later = t0 + chrono::Duration::hours(2);
    locks.try_claim_at("d", "w", later).unwrap();
    let ids: Vec<String> = locks
        .sessions()
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert!(!ids.contains(&done));
    assert!(ids.contains(&abandoned));
    assert_eq!(ids.len(), 3);

    // A sweep interrupts it; the next sweep past the window drops it.
    let swept = locks.interrupt_stale_at(later).unwrap();
    assert!(swept.contains(&abandoned));
    locks
        .interrupt_stale_at(later + chrono::Duration::hours(2))
        .unwrap();
    let ids: Vec<String> = locks
        .sessions()
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert!(!ids.contains(&abandoned));
}

#[test]
fn pruning_keeps_the_session_file_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(RealFileSystem, dir.path()));
    let locks = LockManager::new(store, TTL).with_retention(Duration::ZERO);

    for i in 0..20 {
        let claim = locks.try_claim(&format!("task-{i}"), "runner").unwrap();
        let session = claim.claim().unwrap().session_id.clone();
        locks.release(&session, SessionStatus::Complete).unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }
    let swept = locks.interrupt_stale().unwrap();
    assert!(swept.is_empty());
    assert!(locks.sessions().unwrap().is_empty());
}

#[test]
fn sweeping_interrupts_only_stale_sessions() {
    let locks = memory_locks();
    let t0 = Utc::now();
    let old = locks
        .try_claim_at("a", "x", t0)
        .unwrap()
        .claim()
        .unwrap()
        .session_id
        .clone();
    let later = t0 + chrono::Duration::seconds(45);
    locks.try_claim_at("b", "y", later).unwrap();

    let swept = locks
        .interrupt_stale_at(t0 + chrono::Duration::seconds(90))
        .unwrap();
    assert_eq!(swept, vec![old]);
}
