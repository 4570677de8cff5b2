//! Cluster ready queue (spec §2.7, §2.9): a priority-then-FIFO list of
//! runnable tasks shared by every processor on a cluster.
//!
//! Grounded on `task/readyqueue.rs`'s `Queue` trait and its
//! `pop_front_task`/`ScheduleDecision` contract, adapted to a
//! `Mutex`+`Condvar`-guarded queue instead of `r3_kernel`'s
//! `CpuLockCell`-protected intrusive list: that queue is only ever
//! touched with interrupts already disabled on a single CPU, while this
//! queue is genuinely contended by several concurrently running processor
//! threads and must support a *blocking* pop (spec §4.5 step 2: "blocking
//! on `processorPause` via a futex-like wake if empty").
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use ust_portkit::PriorityFifoQueue;

use crate::task::{Task, TaskState};
use std::sync::Arc;

pub struct ReadyQueue {
    state: Mutex<State>,
    wake: Condvar,
}

struct State {
    queue: PriorityFifoQueue<Arc<Task>>,
    shutting_down: bool,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: PriorityFifoQueue::new(),
                shutting_down: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Insert `task` into the ready queue and mark it Ready, waking one
    /// idle processor (spec §4.5 step 2's "futex-like wake").
    pub fn push(&self, task: Arc<Task>) {
        task.set_state(TaskState::Ready);
        let priority = task.active_priority().get() as i64;
        let mut state = self.state.lock().unwrap();
        state.queue.insert(priority, task);
        self.wake.notify_one();
    }

    /// Block the calling processor until a task is ready or the cluster is
    /// shutting down.
    pub fn pop_blocking(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            if state.shutting_down {
                return None;
            }
            state = self.wake.wait(state).unwrap();
        }
    }

    /// Non-blocking pop, used by the processor kernel loop's step 2 variant
    /// that also needs to poll the event list between attempts.
    pub fn pop_timeout(&self, deadline: Option<Instant>) -> Option<Arc<Task>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            if state.shutting_down {
                return None;
            }
            match deadline {
                None => return None,
                Some(at) => {
                    let now = Instant::now();
                    if at <= now {
                        return None;
                    }
                    let (s, timeout) = self.wake.wait_timeout(state, at - now).unwrap();
                    state = s;
                    if timeout.timed_out() {
                        return state.queue.pop_front();
                    }
                }
            }
        }
    }

    /// Reposition `task` in the ready queue after its active priority
    /// changed while it was already Ready (PIQ transitive repositioning,
    /// spec §4.9).
    pub fn reposition(&self, task: &Arc<Task>, new_priority: i64) {
        let mut state = self.state.lock().unwrap();
        let id = task.id;
        state.queue.reposition(new_priority, |t| t.id == id);
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        self.wake.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ust_core::Priority;

    #[test]
    fn push_then_pop_round_trips() {
        let rq = ReadyQueue::new();
        let t = Task::new("t", Priority::NORMAL);
        rq.push(Arc::clone(&t));
        let popped = rq.pop_blocking().unwrap();
        assert_eq!(popped.id, t.id);
    }

    #[test]
    fn higher_priority_pops_first() {
        let rq = ReadyQueue::new();
        let low = Task::new("low", Priority::new(1));
        let high = Task::new("high", Priority::new(9));
        rq.push(Arc::clone(&low));
        rq.push(Arc::clone(&high));
        assert_eq!(rq.pop_blocking().unwrap().id, high.id);
        assert_eq!(rq.pop_blocking().unwrap().id, low.id);
    }

    #[test]
    fn shutdown_unblocks_waiting_pop() {
        let rq = Arc::new(ReadyQueue::new());
        let rq2 = Arc::clone(&rq);
        let handle = std::thread::spawn(move || rq2.pop_blocking());
        std::thread::sleep(std::time::Duration::from_millis(20));
        rq.shutdown();
        assert!(handle.join().unwrap().is_none());
    }
}
