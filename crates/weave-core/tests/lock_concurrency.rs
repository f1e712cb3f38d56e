//! Concurrency tests for the named-lock namespaces.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    time::{Duration, Instant},
};

use tokio_test::assert_ok;
use weave_core::{LockManager, LockNamespace};

const DEADLINE: Duration = Duration::from_secs(5);

/// Tracks how many callers are inside a section at once.
#[derive(Default)]
struct Occupancy {
    inside: AtomicUsize,
    peak: AtomicUsize,
    entries: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BLOCKING FLAVORS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn sync_lock_serializes_contending_threads() {
    let locks = Arc::new(LockManager::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let (held_tx, held_rx) = mpsc::channel::<()>();

    let first = {
        let locks = Arc::clone(&locks);
        let order = Arc::clone(&order);
        std::thread::spawn(move || {
            locks.sync_lock("db", || {
                order.lock().unwrap().push("first start");
                held_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(30));
                order.lock().unwrap().push("first end");
            })
        })
    };
    held_rx.recv_timeout(DEADLINE).unwrap();

    let second = {
        let locks = Arc::clone(&locks);
        let order = Arc::clone(&order);
        std::thread::spawn(move || {
            locks.sync_lock("db", || {
                order.lock().unwrap().push("second start");
                order.lock().unwrap().push("second end");
            })
        })
    };

    assert_ok!(first.join().unwrap());
    assert_ok!(second.join().unwrap());
    assert_eq!(
        *order.lock().unwrap(),
        ["first start", "first end", "second start", "second end"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sync_lock_admits_one_task_at_a_time() {
    let locks = Arc::new(LockManager::new());
    let occupancy = Arc::new(Occupancy::default());

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let occupancy = Arc::clone(&occupancy);
            tokio::spawn(async move {
                locks
                    .concurrent_sync_lock("db", || async {
                        occupancy.enter();
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        occupancy.leave();
                    })
                    .await
            })
        })
        .collect();

    for caller in callers {
        assert_ok!(caller.await.unwrap());
    }
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(occupancy.entries.load(Ordering::SeqCst), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn namespaces_never_block_each_other() {
    let locks = Arc::new(LockManager::new());
    let _sync_held = locks
        .try_acquire(LockNamespace::SyncBlocking, "db")
        .unwrap()
        .expect("free");
    let _skip_held = locks
        .try_acquire(LockNamespace::SyncSkip, "db")
        .unwrap()
        .expect("free");

    let value = tokio::time::timeout(
        DEADLINE,
        locks.concurrent_sync_lock("db", || async { "async side" }),
    )
    .await
    .expect("async namespace is independent");
    assert_eq!(assert_ok!(value), "async side");

    let skipped = locks.concurrent_skip_lock("db", || async { 1 }).await;
    assert_eq!(assert_ok!(skipped), Some(1));
}

// ═══════════════════════════════════════════════════════════════════════════
// SKIP FLAVORS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn skip_lock_returns_promptly_when_held() {
    let locks = Arc::new(LockManager::new());
    let (held_tx, held_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = {
        let locks = Arc::clone(&locks);
        std::thread::spawn(move || {
            locks.skip_lock("poll", move || {
                held_tx.send(()).unwrap();
                release_rx.recv_timeout(DEADLINE).unwrap();
            })
        })
    };
    held_rx.recv_timeout(DEADLINE).unwrap();

    let ran = AtomicBool::new(false);
    let started = Instant::now();
    let second = locks.skip_lock("poll", || ran.store(true, Ordering::SeqCst));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!assert_ok!(second));
    assert!(!ran.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    assert!(assert_ok!(holder.join().unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_skip_lock_skips_contended_body() {
    let locks = Arc::new(LockManager::new());
    let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let locks = Arc::clone(&locks);
        tokio::spawn(async move {
            locks
                .concurrent_skip_lock("poll", || async move {
                    held_tx.send(()).unwrap();
                    release_rx.await.unwrap();
                    "holder"
                })
                .await
        })
    };
    held_rx.await.unwrap();

    let skipped = locks.concurrent_skip_lock("poll", || async { "intruder" }).await;
    assert_eq!(assert_ok!(skipped), None);

    release_tx.send(()).unwrap();
    assert_eq!(assert_ok!(holder.await.unwrap()), Some("holder"));
}

// ═══════════════════════════════════════════════════════════════════════════
// DESTRUCTION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn destroy_while_contended_keeps_mutual_exclusion() {
    let locks = Arc::new(LockManager::new());
    let occupancy = Arc::new(Occupancy::default());
    let done = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let occupancy = Arc::clone(&occupancy);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    locks
                        .sync_lock("db", || {
                            occupancy.enter();
                            std::hint::spin_loop();
                            occupancy.leave();
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    let destroyer = {
        let locks = Arc::clone(&locks);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut destroyed = 0_usize;
            while !done.load(Ordering::SeqCst) {
                if locks
                    .destroy_lock(LockNamespace::SyncBlocking, "db", false)
                    .unwrap()
                {
                    destroyed += 1;
                }
                std::thread::yield_now();
            }
            destroyed
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let destroyed = destroyer.join().unwrap();

    assert!(destroyed > 0);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(occupancy.entries.load(Ordering::SeqCst), 800);
}

#[test]
fn destroy_outcomes_per_holder_state() {
    let locks = LockManager::new();
    assert!(assert_ok!(locks.destroy_lock(LockNamespace::AsyncBlocking, "never", false)));

    let guard = locks
        .acquire_blocking(LockNamespace::AsyncBlocking, "db")
        .unwrap();
    assert!(!assert_ok!(locks.destroy_lock(LockNamespace::AsyncBlocking, "db", false)));
    assert!(locks.contains(LockNamespace::AsyncBlocking, "db"));
    assert_eq!(locks.lock_count(LockNamespace::AsyncBlocking), 1);

    assert!(assert_ok!(locks.destroy_lock(LockNamespace::AsyncBlocking, "db", true)));
    assert_eq!(locks.lock_count(LockNamespace::AsyncBlocking), 0);
    guard.release();

    assert!(assert_ok!(locks.check_lock(LockNamespace::AsyncBlocking, "db")));
}
