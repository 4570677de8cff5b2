//! `CondLock` (spec §4.6/§4.7): a condition variable that uses *wait
//! morphing* — a signalled task is chained directly onto the lock it was
//! waiting to reacquire, rather than woken onto the ready queue to race
//! for that lock itself.
//!
//! Grounded directly on `uC++.cc`'s `uCondLock::wait`/`signal`/`broadcast`:
//! each waiter remembers which lock it must reacquire (`task.ownerLock_`
//! there; the `readd` closure here), queues itself on the condition's own
//! wait list *before* releasing that lock (so a concurrent `signal` can
//! never observe an empty condition queue while a waiter is still
//! mid-transition), then blocks. `signal`/`broadcast` pop waiters and hand
//! them straight to their lock's `add_`, exactly `uC++.cc`'s "chain to
//! its owner lock" comment. `OwnerLock`'s recursion depth is saved before
//! blocking and restored via the same hand-off, matching `uC++.cc`'s
//! `prevcnt`/`lock.count = prevcnt` pair. `signal_block`, grounded on
//! `uCondition::signalBlock` in the same file, additionally blocks the
//! signaller so the woken task runs next rather than whenever the
//! signaller eventually releases the lock on its own.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ust_portkit::SpinLock;

use crate::current;
use crate::lock::{MutexLock, OwnerLock};
use crate::scheduler::schedule;
use crate::task::Task;
use crate::timeout::TimeoutGuard;

/// A lock `CondLock` can chain a signalled waiter onto. Implemented for
/// `MutexLock` and `OwnerLock`; `Semaphore`/`Lock` have no owner concept to
/// hand a condition wait off to.
pub trait WaitableLock: Send + Sync {
    /// Release the lock on the waiter's behalf, returning whatever must be
    /// restored when it is handed back (an `OwnerLock`'s recursion depth;
    /// `1` for non-recursive locks).
    fn release_(&self) -> u32;

    /// Hand the lock directly to `task`, restoring `depth` if recursive.
    fn add_(&self, task: Arc<Task>, depth: u32);
}

impl WaitableLock for MutexLock {
    fn release_(&self) -> u32 {
        MutexLock::release_(self);
        1
    }

    fn add_(&self, task: Arc<Task>, _depth: u32) {
        MutexLock::add_(self, task)
    }
}

impl WaitableLock for OwnerLock {
    fn release_(&self) -> u32 {
        OwnerLock::release_saving_depth(self)
    }

    fn add_(&self, task: Arc<Task>, depth: u32) {
        OwnerLock::add_restoring_depth(self, task, depth)
    }
}

struct Waiter {
    task: Arc<Task>,
    info: u64,
    readd: Box<dyn FnOnce(Arc<Task>) + Send>,
}

pub struct CondLock {
    waiting: SpinLock<VecDeque<Waiter>>,
}

impl CondLock {
    pub fn new() -> Self {
        Self {
            waiting: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    /// The information stashed by the longest-waiting task, if any (spec
    /// §4.7's `front`, used by monitors to decide whether a condition is
    /// worth signalling).
    pub fn front(&self) -> Option<u64> {
        self.waiting.lock().front().map(|w| w.info)
    }

    /// Block on this condition, releasing `lock` first and reacquiring it
    /// (via direct hand-off, not by competing on the ready queue) once
    /// signalled.
    pub fn wait<L: WaitableLock + 'static>(self: &Arc<Self>, lock: &Arc<L>) {
        self.wait_info(lock, 0);
    }

    /// As `wait`, additionally stashing `info` for a later `front()` read
    /// by whoever decides when to signal this condition.
    pub fn wait_info<L: WaitableLock + 'static>(self: &Arc<Self>, lock: &Arc<L>, info: u64) {
        let me = current::task();
        let mut state = self.waiting.lock();
        let index = state.len();
        // Queue first (placeholder `readd`), then release the lock — never
        // observable as "condition empty but a waiter is about to enqueue".
        state.push_back(Waiter {
            task: Arc::clone(&me),
            info,
            readd: Box::new(|_| {}),
        });
        let depth = lock.release_();
        let lock = Arc::clone(lock);
        state[index].readd = Box::new(move |task| lock.add_(task, depth));
        schedule(&me, move || drop(state));
    }

    /// As `wait`, but give up and return `false` if not signalled by
    /// `deadline`. On timeout the task is unlinked from this condition and
    /// handed directly to `lock` exactly as `signal` would, matching
    /// `uC++.cc`'s `TimedWaitHandler`/`waitTimeout` path.
    pub fn wait_timeout<L: WaitableLock + 'static>(
        self: &Arc<Self>,
        lock: &Arc<L>,
        deadline: Instant,
    ) -> bool {
        self.wait_timeout_info(lock, 0, deadline)
    }

    pub fn wait_timeout_info<L: WaitableLock + 'static>(
        self: &Arc<Self>,
        lock: &Arc<L>,
        info: u64,
        deadline: Instant,
    ) -> bool {
        let me = current::task();
        let task_id = me.id;
        let mut state = self.waiting.lock();
        let index = state.len();
        state.push_back(Waiter {
            task: Arc::clone(&me),
            info,
            readd: Box::new(|_| {}),
        });
        let depth = lock.release_();
        let lock = Arc::clone(lock);
        state[index].readd = Box::new(move |task| lock.add_(task, depth));

        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out2 = Arc::clone(&timed_out);
        let this = Arc::clone(self);
        let cluster = current::cluster();
        let guard = TimeoutGuard::new(&cluster.events, deadline, move || {
            let mut state = this.waiting.lock();
            if let Some(pos) = state.iter().position(|w| w.task.id == task_id) {
                let waiter = state.remove(pos).unwrap();
                drop(state);
                timed_out2.store(true, Ordering::SeqCst);
                (waiter.readd)(waiter.task);
            }
        });

        schedule(&me, move || drop(state));
        drop(guard);
        !timed_out.load(Ordering::SeqCst)
    }

    /// Wake the longest-waiting task, chaining it straight onto its lock.
    /// A no-op (returns `false`) if nobody is waiting.
    pub fn signal(&self) -> bool {
        let popped = self.waiting.lock().pop_front();
        match popped {
            Some(w) => {
                (w.readd)(w.task);
                true
            }
            None => false,
        }
    }

    /// Wake the longest-waiting task and give up `lock` to it immediately,
    /// instead of merely making it eligible while the caller keeps running
    /// (as plain `signal` does). The caller blocks and is requeued to
    /// reacquire `lock` once whatever runs next lets go of it in turn.
    ///
    /// Grounded on `uC++.cc`'s `uCondition::signalBlock`: the signaller
    /// pushes itself onto the accept/signalled stack, moves the waiter to
    /// the head of that stack, then leaves the monitor so the signalled
    /// task runs next. A no-op (returns `false`) if nobody is waiting,
    /// matching `signal`.
    pub fn signal_block<L: WaitableLock + 'static>(self: &Arc<Self>, lock: &Arc<L>) -> bool {
        let me = current::task();
        let popped = self.waiting.lock().pop_front();
        let woken = match popped {
            Some(w) => w,
            None => return false,
        };
        // Queue the woken task on `lock`'s own waiting list while we still
        // own it, then give up ownership — `release_` hands the lock to
        // whoever is now at the head of that list, which is the task we
        // just queued.
        (woken.readd)(woken.task);
        let depth = lock.release_();
        lock.add_(Arc::clone(&me), depth);
        schedule(&me, || {});
        true
    }

    /// Wake every waiting task, each onto its own lock.
    pub fn broadcast(&self) -> bool {
        let drained: Vec<Waiter> = self.waiting.lock().drain(..).collect();
        if drained.is_empty() {
            return false;
        }
        for w in drained {
            (w.readd)(w.task);
        }
        true
    }
}

impl Default for CondLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::lock::MutexLock;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;
    use ust_core::{Config, Priority};

    #[test]
    fn signal_wakes_waiter_in_fifo_order() {
        let config = Config::default();
        let cluster = Cluster::new("condlock-fifo");
        let mutex = Arc::new(MutexLock::new());
        let cond = Arc::new(CondLock::new());
        let order = Arc::new(SpinLock::new(Vec::new()));

        for i in 0..3 {
            let mutex = Arc::clone(&mutex);
            let cond = Arc::clone(&cond);
            let order = Arc::clone(&order);
            let task = Task::spawn(format!("waiter{i}"), Priority::NORMAL, move || {
                mutex.acquire();
                cond.wait(&mutex);
                order.lock().push(i);
                mutex.release();
            });
            cluster.spawn_task(task);
        }
        cluster.add_processors(1, &config);
        // Give the waiters a chance to all queue up before signalling.
        std::thread::sleep(Duration::from_millis(20));

        let signaller = Task::spawn("signaller", Priority::NORMAL, move || {
            mutex.acquire();
            mutex.release();
            while cond.signal() {}
        });
        cluster.spawn_task(signaller);
        cluster.shutdown();

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn signal_block_runs_the_waiter_before_the_signaller_resumes() {
        let config = Config::default();
        let cluster = Cluster::new("condlock-signalblock");
        let mutex = Arc::new(MutexLock::new());
        let cond = Arc::new(CondLock::new());
        let order = Arc::new(SpinLock::new(Vec::new()));

        let mutex2 = Arc::clone(&mutex);
        let cond2 = Arc::clone(&cond);
        let order2 = Arc::clone(&order);
        let waiter = Task::spawn("waiter", Priority::NORMAL, move || {
            mutex2.acquire();
            cond2.wait(&mutex2);
            order2.lock().push("waiter");
            mutex2.release();
        });
        cluster.spawn_task(waiter);
        cluster.add_processors(1, &config);
        // Give the waiter a chance to queue up before signalling.
        std::thread::sleep(Duration::from_millis(20));

        let mutex3 = Arc::clone(&mutex);
        let cond3 = Arc::clone(&cond);
        let order3 = Arc::clone(&order);
        let signaller = Task::spawn("signaller", Priority::NORMAL, move || {
            mutex3.acquire();
            cond3.signal_block(&mutex3);
            order3.lock().push("signaller");
            mutex3.release();
        });
        cluster.spawn_task(signaller);
        cluster.shutdown();

        assert_eq!(*order.lock(), vec!["waiter", "signaller"]);
    }

    #[test]
    fn wait_timeout_reports_timeout_when_never_signalled() {
        let config = Config::default();
        let cluster = Cluster::new("condlock-timeout");
        let mutex = Arc::new(MutexLock::new());
        let cond = Arc::new(CondLock::new());
        let result = Arc::new(AtomicBool::new(true));
        let result2 = Arc::clone(&result);
        let mutex2 = Arc::clone(&mutex);
        let cond2 = Arc::clone(&cond);
        let task = Task::spawn("t", Priority::NORMAL, move || {
            mutex2.acquire();
            let signalled = cond2.wait_timeout(&mutex2, Instant::now() + Duration::from_millis(10));
            result2.store(signalled, Ordering::SeqCst);
            mutex2.release();
        });
        cluster.spawn_task(task);
        cluster.add_processors(1, &config);
        cluster.shutdown();
        assert!(!result.load(Ordering::SeqCst));
    }
}
