//! Base task (spec §4.5, §3): a coroutine plus thread identity, scheduler
//! links, a PIQ, and cluster binding.
//!
//! Grounded on `r3_kernel::task`'s `TaskCb`/`TaskSt` state machine
//! (`activate`, `make_ready`, `set_task_base_priority`), generalized from
//! `r3_kernel`'s static, ahead-of-time task table to dynamically spawned
//! `Arc<Task>`s, since this runtime has no compile-time configuration layer
//! (see DESIGN.md "Dropped from r3_kernel").
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use ust_core::Priority;
use ust_portkit::SpinLock;

use crate::cluster::Cluster;
use crate::coroutine::Coroutine;
use crate::current;
use crate::piq::Piq;
use crate::serial::Serial;

/// Spec §3: `state ∈ {Start, Ready, Running, Blocked, Terminate}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Start,
    Ready,
    Running,
    Blocked,
    Terminate,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Fields that change over a task's lifetime, behind one spin lock so
/// `state`, `active priority`, and PIQ membership are always observed
/// consistently together (spec §3 invariant: a task is on at most one of
/// {ready queue, entry queue, mutex/condition wait stack} at a time, and
/// that transition is atomic w.r.t. the processor kernel).
pub(crate) struct TaskInner {
    pub state: TaskState,
    pub base_priority: Priority,
    pub piq: Piq,
    /// The serial instance this task is currently executing inside, if
    /// any (spec §3: "current serial"), used to detect recursive entry.
    pub current_serial: Option<usize>,
    /// Saved mutex-recursion depth while this task is inside a *different*
    /// serial instance's member than the one it is blocked entering
    /// (`uBaseTask::mutexRecursion_` in `uC++.cc`): a task that is already
    /// holding one monitor and calls into another must park its current
    /// depth here across the nested call and get it back on `leave`.
    pub mutex_recursion: u32,
    /// Set by a serial instance's destructor drain (spec §4.8.4) on a task
    /// still blocked trying to enter it; consumed the next time that task's
    /// blocked `enter`/accept call wakes, turning the wakeup into an
    /// `EntryFailure` instead of successful ownership.
    pub pending_entry_failure: bool,
    /// The serial instance this task is currently blocked trying to enter
    /// (sitting in its `entry_list`/a member queue), if any. Lets a later
    /// priority change on this task find its way back to that instance and
    /// re-sort it there (spec §4.9/§9's `uRepositionEntry`).
    pub blocked_on: Option<Weak<Serial>>,
}

pub struct Task {
    pub id: u64,
    pub name: String,
    pub coroutine: Arc<Coroutine>,
    inner: SpinLock<TaskInner>,
    /// The cluster this task is a member of, set once by
    /// [`crate::cluster::Cluster::spawn_task`] before the task is ever
    /// placed on a ready queue. `None` for tasks that are never dispatched
    /// (e.g. `Task::new` in scheduler-plumbing tests).
    cluster: OnceLock<Arc<Cluster>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("base_priority", &inner.base_priority)
            .finish()
    }
}

impl Task {
    /// Construct a task with no body installed yet. Useful for scheduler
    /// plumbing tests that only exercise queue ordering and never actually
    /// dispatch the task's coroutine; real tasks should use [`Task::spawn`].
    pub fn new(name: impl Into<String>, base_priority: Priority) -> Arc<Self> {
        Self::new_with_coroutine(name, base_priority, Coroutine::new())
    }

    /// Construct a runnable task: `body` becomes the task's coroutine entry
    /// point, run the first time this task is ever dispatched by a
    /// processor (spec §3: "Start → Ready on first schedule").
    ///
    /// The body is wrapped so that, on the task's own dedicated coroutine
    /// thread, `current::task()`/`current::cluster()` resolve to this task
    /// for the body's entire lifetime (every suspend/resume cycle stays on
    /// the same OS thread — see `current.rs`'s module doc).
    pub fn spawn(
        name: impl Into<String>,
        base_priority: Priority,
        body: impl FnOnce() + Send + 'static,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Task>| {
            let weak_for_body = weak.clone();
            let coroutine = Coroutine::with_body(move || {
                let task = weak_for_body
                    .upgrade()
                    .expect("task dropped before its coroutine body ran");
                current::enter(task);
                body();
                current::leave();
            });
            coroutine.set_name(name.clone());
            Self {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                coroutine: Arc::new(coroutine),
                inner: SpinLock::new(TaskInner {
                    state: TaskState::Start,
                    base_priority,
                    piq: Piq::new(),
                    current_serial: None,
                    mutex_recursion: 0,
                    pending_entry_failure: false,
                    blocked_on: None,
                }),
                cluster: OnceLock::new(),
            }
        })
    }

    fn new_with_coroutine(
        name: impl Into<String>,
        base_priority: Priority,
        coroutine: Coroutine,
    ) -> Arc<Self> {
        let name = name.into();
        coroutine.set_name(name.clone());
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            coroutine: Arc::new(coroutine),
            inner: SpinLock::new(TaskInner {
                state: TaskState::Start,
                base_priority,
                piq: Piq::new(),
                current_serial: None,
                mutex_recursion: 0,
                pending_entry_failure: false,
                blocked_on: None,
            }),
            cluster: OnceLock::new(),
        })
    }

    /// Bind this task to the cluster it was spawned onto. Called exactly
    /// once, by [`crate::cluster::Cluster::spawn_task`], before the task is
    /// ever placed on a ready queue.
    pub(crate) fn set_cluster(&self, cluster: Arc<Cluster>) {
        let _ = self.cluster.set(cluster);
    }

    /// The cluster this task is a member of.
    ///
    /// # Panics
    /// Panics if the task was never registered on a cluster.
    pub fn cluster(&self) -> Arc<Cluster> {
        Arc::clone(
            self.cluster
                .get()
                .expect("task has not been added to a cluster"),
        )
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: TaskState) {
        self.inner.lock().state = state;
    }

    pub fn base_priority(&self) -> Priority {
        self.inner.lock().base_priority
    }

    /// Active priority: `max(base priority, PIQ top)` (spec §3 invariant).
    pub fn active_priority(&self) -> Priority {
        let inner = self.inner.lock();
        inner.piq.active_priority(inner.base_priority)
    }

    /// Acquire hook (spec §4.9): a caller with priority `p` is now blocked
    /// on an object owned by this task. If this task's own active priority
    /// rises as a result, the change is propagated transitively into
    /// whatever *this* task is itself blocked on (`uRepositionEntry`, spec
    /// §9) before returning.
    pub fn inherit_priority(self: &Arc<Self>, p: Priority) -> Priority {
        let old_active = self.active_priority();
        let new_active = {
            let mut inner = self.inner.lock();
            inner.piq.push(p);
            inner.piq.active_priority(inner.base_priority)
        };
        self.propagate_if_changed(old_active, new_active);
        new_active
    }

    /// Release hook (spec §4.9): one caller with priority `p` stopped
    /// blocking on an object owned by this task. Propagates transitively
    /// the same way [`Task::inherit_priority`] does.
    pub fn disinherit_priority(self: &Arc<Self>, p: Priority) -> Priority {
        let old_active = self.active_priority();
        let new_active = {
            let mut inner = self.inner.lock();
            inner.piq.remove(p);
            inner.piq.active_priority(inner.base_priority)
        };
        self.propagate_if_changed(old_active, new_active);
        new_active
    }

    /// Re-sort this task's own registration in whatever it is blocked on
    /// (the ready queue if `Ready`, or a serial instance's `entry_list`/
    /// member queue if it is itself a blocked caller), then swap out the
    /// priority value that registration contributed to *its* owner's PIQ,
    /// recursing until a hop's active priority is unaffected or the chain
    /// ends (spec §4.9's "walking the blocking chain transitively", §9's
    /// `uRepositionEntry`).
    fn propagate_if_changed(self: &Arc<Self>, old_active: Priority, new_active: Priority) {
        if old_active == new_active {
            return;
        }
        if self.state() == TaskState::Ready {
            if let Some(cluster) = self.cluster.get() {
                cluster.ready_queue.reposition(self, new_active.get() as i64);
            }
        }
        let Some(serial) = self.blocked_on().and_then(|w| w.upgrade()) else {
            return;
        };
        let Some(owner) = serial.reposition_waiter(self.id, new_active.get() as i64) else {
            return;
        };
        // A stale `blocked_on` can outlive the narrow window between this
        // task being installed as the new owner (`Serial::release_owner`)
        // and its own resumed `enter` clearing the field — never chain a
        // task's PIQ update into itself.
        if owner.id == self.id {
            return;
        }
        owner.reposition_inherited(old_active, new_active);
    }

    /// Swap one previously-inherited priority for another in a single PIQ
    /// update (rather than a separate `disinherit`+`inherit` pair, which
    /// would transiently expose the old value's absence), then continue the
    /// chain walk if this task's own active priority moved as a result.
    fn reposition_inherited(self: &Arc<Self>, old: Priority, new: Priority) -> Priority {
        let old_active = self.active_priority();
        let new_active = {
            let mut inner = self.inner.lock();
            inner.piq.replace(old, new);
            inner.piq.active_priority(inner.base_priority)
        };
        self.propagate_if_changed(old_active, new_active);
        new_active
    }

    /// The serial instance this task is currently registered as a blocked
    /// caller on, if any (spec §9's `uRepositionEntry` chain-walk anchor).
    pub(crate) fn blocked_on(&self) -> Option<Weak<Serial>> {
        self.inner.lock().blocked_on.clone()
    }

    pub(crate) fn set_blocked_on(&self, serial: Option<Weak<Serial>>) {
        self.inner.lock().blocked_on = serial;
    }

    pub fn set_base_priority(&self, p: Priority) {
        self.inner.lock().base_priority = p;
    }

    pub(crate) fn current_serial(&self) -> Option<usize> {
        self.inner.lock().current_serial
    }

    pub(crate) fn set_current_serial(&self, id: Option<usize>) {
        self.inner.lock().current_serial = id;
    }

    pub(crate) fn mutex_recursion(&self) -> u32 {
        self.inner.lock().mutex_recursion
    }

    /// Save and zero the recursion counter on a fresh (non-recursive) entry
    /// into a serial instance, returning what must be passed back to the
    /// matching `leave`.
    pub(crate) fn take_mutex_recursion(&self) -> u32 {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.mutex_recursion, 0)
    }

    pub(crate) fn bump_mutex_recursion(&self) {
        self.inner.lock().mutex_recursion += 1;
    }

    pub(crate) fn dec_mutex_recursion(&self) {
        self.inner.lock().mutex_recursion -= 1;
    }

    pub(crate) fn restore_mutex_recursion(&self, depth: u32) {
        self.inner.lock().mutex_recursion = depth;
    }

    pub(crate) fn set_pending_entry_failure(&self) {
        self.inner.lock().pending_entry_failure = true;
    }

    pub(crate) fn take_pending_entry_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.pending_entry_failure, false)
    }

    /// Arm cancellation on this task's coroutine (spec §4.4). Convenience
    /// wrapper; delegates entirely to the coroutine.
    pub fn enable_cancellation(&self, kind: crate::coroutine::CancellationType) {
        self.coroutine.enable_cancellation(kind);
    }

    pub fn disable_cancellation(&self) {
        self.coroutine.disable_cancellation();
    }

    /// Request that this task's coroutine cancel at its next poll point.
    pub fn request_cancellation(&self) {
        self.coroutine.request_cancellation();
    }

    pub fn cancellation_requested(&self) -> bool {
        self.coroutine.cancellation_requested()
    }
}

/// A weak reference to a task, used in links that must not keep the task
/// alive on their own (e.g. `lastAcceptor`, a serial instance's cached
/// owner for diagnostics).
pub type TaskWeak = Weak<Task>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_priority_reflects_inheritance_and_release() {
        let t = Task::new("t", Priority::new(1));
        assert_eq!(t.active_priority(), Priority::new(1));
        t.inherit_priority(Priority::new(9));
        assert_eq!(t.active_priority(), Priority::new(9));
        t.disinherit_priority(Priority::new(9));
        assert_eq!(t.active_priority(), Priority::new(1));
    }

    #[test]
    fn new_task_starts_in_start_state() {
        let t = Task::new("t", Priority::NORMAL);
        assert_eq!(t.state(), TaskState::Start);
    }
}
