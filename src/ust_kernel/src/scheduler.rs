//! The `schedule(...)` family (spec §4.5): "the sole bridge from user
//! context into the kernel."
//!
//! Spec §4.5 describes four overloads covering "release a spin lock on the
//! way in? / wake another task on the way out?". Rust has no overload
//! resolution, but it has first-class closures, which is a strictly more
//! general way to express the same four cases (and everything in between,
//! e.g. "release two locks and wake two tasks") — so this is a single
//! function taking a closure for "whatever needs to happen on the kernel
//! side of the switch", run *after* this task has suspended from the
//! caller's perspective but *before* any other processor could plausibly
//! start running this task again, matching spec §4.5's invariant that the
//! release/wake happen "on the kernel stack" so "the leaving task's stack
//! is quiescent before any other processor can touch it".
use std::sync::Arc;

use crate::task::{Task, TaskState};

/// Suspend `task` (the caller, which must be running on `task`'s own
/// thread), after marking it `Blocked`, running `on_switch` to perform
/// whatever release/wake bookkeeping the caller needs. `on_switch` runs
/// after the new state is visible to other processors but the precise
/// instant at which `task`'s own thread actually parks is internal to
/// `Coroutine::suspend` — callers must not assume anything about `task`'s
/// state observable to others until `schedule` returns.
pub fn schedule(task: &Task, on_switch: impl FnOnce()) {
    task.set_state(TaskState::Blocked);
    on_switch();
    task.coroutine.suspend();
    // Deliberately not a cancellation poll point: by the time most callers
    // resume here, ownership of whatever they were waiting for (a lock, a
    // condition variable's hand-off) has already been granted to `task` by
    // the releasing task's `add_`/`release_` call, with no destructor left
    // to give it back. Unwinding right here would abandon that resource
    // forever. `Serial::enter`/`leave` check at their own safe boundaries
    // instead (see DESIGN.md's cancellation entry).
}

/// The common "wake one other task" half of `on_switch`, factored out
/// because almost every caller of `schedule` either releases a lock, wakes
/// a successor, or both.
pub fn wake(ready_queue: &crate::readyqueue::ReadyQueue, successor: Arc<Task>) {
    ready_queue.push(successor);
}
