//! Per-OS-thread "who am I / what cluster is this" lookup.
//!
//! Grounded on uC++'s pervasive `uThisTask()`/`TLS_GET` idiom: uC++
//! stashes the running task in thread-local storage so any kernel routine
//! can ask "which task called me" without threading a reference through
//! every call. The blocking lock family (`lock.rs`, `condlock.rs`) and the
//! serial instance (`serial.rs`) need exactly this — they must know which
//! task to block and which cluster's ready queue to wake a successor onto,
//! without every one of their methods taking `&Task` and `&Cluster`
//! parameters the caller would otherwise have to carry around everywhere.
//!
//! A task's coroutine body runs on its own dedicated OS thread for the
//! entire lifetime of the task (spec §4.4: `resume`/`suspend` park and
//! unpark that one thread; they never move the body to a different OS
//! thread). So the thread-local here is installed exactly once, from
//! inside that body thread itself, right before the user's code starts
//! running (see `Task::spawn`) — not by whichever processor thread happens
//! to call `resume()`, which would set the wrong thread's TLS entirely.
use std::cell::RefCell;
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::task::Task;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// Install `task` as the task running on this OS thread. Called once, by
/// the task's own dedicated coroutine thread, immediately before its body
/// starts executing.
pub(crate) fn enter(task: Arc<Task>) {
    CURRENT_TASK.with(|c| *c.borrow_mut() = Some(task));
}

/// Clear the running task for this OS thread. Called once, by the task's
/// own dedicated coroutine thread, immediately after its body returns.
pub(crate) fn leave() {
    CURRENT_TASK.with(|c| *c.borrow_mut() = None);
}

/// The task currently running on this OS thread.
///
/// # Panics
/// Panics if called from a thread that is not a task's own coroutine
/// thread (spec §4.5) — e.g. from a test harness thread that built a
/// `Task` directly without ever spawning/dispatching it, or from a
/// virtual-processor thread itself (the processor is never "the current
/// task").
pub fn task() -> Arc<Task> {
    CURRENT_TASK.with(|c| {
        Arc::clone(
            c.borrow()
                .as_ref()
                .expect("current::task() called outside a running task body"),
        )
    })
}

/// The cluster the currently running task belongs to.
///
/// # Panics
/// Same condition as [`task`], plus: panics if the current task was never
/// registered on a cluster via [`crate::cluster::Cluster::spawn_task`].
pub fn cluster() -> Arc<Cluster> {
    task().cluster()
}

/// Like [`task`] but returns `None` instead of panicking, for call sites
/// that have a reasonable fallback — e.g. `Serial::new()`, which may run
/// either inside a dispatched task (becomes its initial owner) or from
/// ordinary setup code outside any task (starts unowned).
pub fn try_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|c| c.borrow().as_ref().map(Arc::clone))
}
