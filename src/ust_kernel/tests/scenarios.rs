//! Cross-processor handoff: two virtual processors share one cluster; a
//! condition signal raised by whichever task currently owns the mutex must
//! wake its partner with the lock already handed off, even when that
//! partner's next dispatch lands on the *other* processor's OS thread.
//!
//! The original scenario this is grounded on runs the bounce for 10^6
//! rounds to build confidence against a lost signal; this test uses a much
//! smaller round count so it finishes in well under a second; the
//! correctness property being exercised (wait morphing never drops a
//! signal, direct hand-off never hands the lock to two owners at once)
//! does not depend on the round count, only the count chosen here trades
//! confidence for test runtime.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ust_core::{Config, Priority};
use ust_kernel::{CondLock, Cluster, MutexLock, Task};

const ROUNDS: u64 = 5_000;

#[test]
fn cross_processor_handoff_loses_no_signal() {
    let config = Config::default();
    let cluster = Cluster::new("handoff");
    let mutex = Arc::new(MutexLock::new());
    let t1_turn = Arc::new(CondLock::new());
    let t2_turn = Arc::new(CondLock::new());
    let turn = Arc::new(AtomicBool::new(true));
    let t1_rounds = Arc::new(AtomicU64::new(0));
    let t2_rounds = Arc::new(AtomicU64::new(0));

    let t1 = {
        let mutex = Arc::clone(&mutex);
        let wake_me = Arc::clone(&t1_turn);
        let wake_other = Arc::clone(&t2_turn);
        let turn = Arc::clone(&turn);
        let rounds = Arc::clone(&t1_rounds);
        Task::spawn("t1", Priority::NORMAL, move || {
            mutex.acquire();
            for _ in 0..ROUNDS {
                while !turn.load(Ordering::SeqCst) {
                    wake_me.wait(&mutex);
                }
                rounds.fetch_add(1, Ordering::SeqCst);
                turn.store(false, Ordering::SeqCst);
                wake_other.signal();
            }
            mutex.release();
        })
    };

    let t2 = {
        let mutex = Arc::clone(&mutex);
        let wake_me = Arc::clone(&t2_turn);
        let wake_other = Arc::clone(&t1_turn);
        let turn = Arc::clone(&turn);
        let rounds = Arc::clone(&t2_rounds);
        Task::spawn("t2", Priority::NORMAL, move || {
            mutex.acquire();
            for _ in 0..ROUNDS {
                while turn.load(Ordering::SeqCst) {
                    wake_me.wait(&mutex);
                }
                rounds.fetch_add(1, Ordering::SeqCst);
                turn.store(true, Ordering::SeqCst);
                wake_other.signal();
            }
            mutex.release();
        })
    };

    cluster.spawn_task(t1);
    cluster.spawn_task(t2);
    // Two processors so a woken task's next dispatch can genuinely land on
    // a different OS thread than the one that signalled it.
    cluster.add_processors(2, &config);
    cluster.shutdown();

    assert_eq!(t1_rounds.load(Ordering::SeqCst), ROUNDS);
    assert_eq!(t2_rounds.load(Ordering::SeqCst), ROUNDS);
}
