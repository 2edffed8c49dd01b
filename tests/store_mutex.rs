// tests/store_mutex.rs

mod common;
use crate::common::init_tracing;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use workdag::errors::WorkdagError;
use workdag::fs::mock::MockFileSystem;
use workdag::fs::{FileMutex, FileSystem, RealFileSystem};

const LOCK: &str = "/state/sessions/.mutex";

fn owner_from(seconds_ago: i64) -> String {
    let acquired_at = Utc::now() - chrono::Duration::seconds(seconds_ago);
    format!(r#"{{"pid":4242,"acquired_at":"{}"}}"#, acquired_at.to_rfc3339())
}

fn quick(path: &str) -> FileMutex {
    FileMutex::new(path).with_wait(Duration::from_millis(50))
}

#[test]
fn a_lock_left_by_a_dead_holder_is_taken_over() {
    init_tracing();
    let fs = MockFileSystem::new();
    let dead = owner_from(120);
    fs.add_file(LOCK, dead.clone());

    let guard = quick(LOCK).lock(&fs).unwrap();
    assert_ne!(fs.read_to_string(Path::new(LOCK)).unwrap(), dead);
    assert!(!fs.exists(Path::new("/state/sessions/.mutex.break")));

    drop(guard);
    assert!(!fs.exists(Path::new(LOCK)));
}

#[test]
fn a_live_holder_makes_contenders_time_out() {
    let fs = MockFileSystem::new();
    let _held = quick(LOCK).lock(&fs).unwrap();

    match quick(LOCK).lock(&fs) {
        Err(WorkdagError::StoreBusy(msg)) => assert!(msg.contains(".mutex"), "{msg}"),
        other => panic!("expected StoreBusy, got {other:?}"),
    }
}

#[test]
fn an_empty_lock_file_expires_by_its_modification_time() {
    init_tracing();
    let fs = MockFileSystem::new();
    // The holder died between creating the file and writing its owner.
    fs.add_file(LOCK, "");

    assert!(matches!(
        quick(LOCK).lock(&fs),
        Err(WorkdagError::StoreBusy(_))
    ));

    fs.set_modified(LOCK, SystemTime::now() - Duration::from_secs(60));
    let guard = quick(LOCK).lock(&fs).unwrap();
    assert!(!fs.read_to_string(Path::new(LOCK)).unwrap().is_empty());
    drop(guard);
}

#[test]
fn an_abandoned_breaker_does_not_wedge_the_lock() {
    let fs = MockFileSystem::new();
    fs.add_file(LOCK, owner_from(120));
    fs.add_file("/state/sessions/.mutex.break", owner_from(120));
    fs.set_modified(
        "/state/sessions/.mutex.break",
        SystemTime::now() - Duration::from_secs(60),
    );

    let _guard = quick(LOCK).lock(&fs).unwrap();
    assert!(!fs.exists(Path::new("/state/sessions/.mutex.break")));
}

#[test]
fn a_guard_leaves_a_lock_that_was_taken_over_in_place() {
    init_tracing();
    let fs = MockFileSystem::new();
    let slow = quick(LOCK).lock(&fs).unwrap();
    thread::sleep(Duration::from_millis(5));

    let eager = quick(LOCK).with_stale_after(Duration::ZERO);
    let taken = eager.lock(&fs).unwrap();

    drop(slow);
    assert!(fs.exists(Path::new(LOCK)));
    drop(taken);
    assert!(!fs.exists(Path::new(LOCK)));
}

#[test]
fn contenders_breaking_one_stale_lock_never_overlap() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let lock = dir.path().join(".mutex");
    std::fs::write(&lock, owner_from(120)).unwrap();

    let contenders = 8;
    let rounds = 20;
    let barrier = Arc::new(Barrier::new(contenders));
    let inside = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let mutex = FileMutex::new(&lock);
            let barrier = Arc::clone(&barrier);
            let inside = Arc::clone(&inside);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let fs = RealFileSystem;
                barrier.wait();
                for _ in 0..rounds {
                    let _guard = mutex.lock(&fs).unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                    entered.fetch_add(1, Ordering::SeqCst);
                    inside.store(false, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(entered.load(Ordering::SeqCst), contenders * rounds);
    assert!(!lock.exists());
}
