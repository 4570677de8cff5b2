//! Processor kernel (spec §4.5): the per-virtual-processor loop that is
//! "the sole place a context switch happens."
use std::sync::Arc;
use std::thread::JoinHandle;

use ust_core::Config;

use crate::cluster::Cluster;
use crate::interrupt;
use crate::task::TaskState;

pub struct Processor {
    pub name: String,
    handle: Option<JoinHandle<()>>,
}

impl Processor {
    pub fn spawn(name: String, cluster: Arc<Cluster>, config: Config) -> Self {
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .stack_size(config.stack_size_default)
            .spawn(move || processor_loop(&cluster))
            .expect("failed to spawn virtual processor thread");
        Self {
            name,
            handle: Some(handle),
        }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The processor-kernel loop (spec §4.5):
///
///  1. Accept preemption; poll the event list for ready timeouts.
///  2. Pull a task from the cluster ready queue, blocking if empty.
///  3. Switch into the task.
///  4. On return, loop — the suspending operation has already placed the
///     task wherever it needs to be (ready queue, some wait structure, or
///     nowhere if it terminated).
fn processor_loop(cluster: &Arc<Cluster>) {
    loop {
        // Step 1: run any timeouts whose deadline has passed.
        cluster.events.run_expired();
        if interrupt::take_pending_yield() {
            log::trace!("{:?}: rolling forward a deferred preemption", std::thread::current().id());
        }

        if cluster.is_shutting_down() && cluster.ready_queue.len() == 0 {
            break;
        }

        // Step 2: pull a task, waking no later than the next timeout.
        let deadline = cluster.events.earliest();
        let task = match cluster.ready_queue.pop_timeout(deadline) {
            Some(task) => task,
            None => {
                if cluster.is_shutting_down() {
                    break;
                }
                continue;
            }
        };

        // Step 3 & 4: switch in, then loop once the task suspends/returns.
        task.set_state(TaskState::Running);
        log::trace!("{} dispatching task {}", std::thread::current().name().unwrap_or("?"), task.name);

        // `current::task()`/`current::cluster()` are installed by the task's
        // own coroutine thread on its first dispatch (see `Task::spawn`) and
        // stay installed across every subsequent suspend/resume, since all
        // of them run on that same dedicated OS thread — the processor
        // thread driving `resume()` here never touches that thread-local.
        let coroutine = Arc::clone(&task.coroutine);
        let result = coroutine.resume();
        if let Err(e) = result {
            log::warn!("task {} failed: {e}", task.name);
        }

        if coroutine.state() == crate::coroutine::State::Halt {
            task.set_state(TaskState::Terminate);
        }
    }
}
