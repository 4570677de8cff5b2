//! Cluster (spec §2.9, §3): a group of virtual processors sharing one ready
//! queue, one idle-processor set, and one event list.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ust_core::Config;

use crate::processor::Processor;
use crate::readyqueue::ReadyQueue;
use crate::task::Task;
use crate::timeout::EventList;

pub struct Cluster {
    pub name: String,
    pub ready_queue: ReadyQueue,
    pub events: EventList,
    processors: Mutex<Vec<Processor>>,
    tasks: Mutex<Vec<Arc<Task>>>,
    shutting_down: AtomicBool,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ready_queue: ReadyQueue::new(),
            events: EventList::new(),
            processors: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Spawn `count` virtual processors bound to this cluster, each running
    /// the processor-kernel loop on its own OS thread (spec §4.5).
    pub fn add_processors(self: &Arc<Self>, count: usize, config: &Config) {
        let mut processors = self.processors.lock().unwrap();
        for i in 0..count {
            let name = format!("{}-proc-{}", self.name, processors.len() + i);
            processors.push(Processor::spawn(name, Arc::clone(self), config.clone()));
        }
    }

    /// Register a task as a member of this cluster and place it on the
    /// ready queue (spec §3: task lifecycle "Start → Ready on first
    /// schedule"). Binds the task to this cluster *before* it is made
    /// visible to any processor, so by the time the task's body starts
    /// running on its own coroutine thread, `current::cluster()` already
    /// resolves correctly there.
    pub fn spawn_task(self: &Arc<Self>, task: Arc<Task>) {
        task.set_cluster(Arc::clone(self));
        self.tasks.lock().unwrap().push(Arc::clone(&task));
        self.ready_queue.push(task);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Shut the cluster down: stop handing out new tasks, wake every idle
    /// processor so it observes the shutdown and exits its loop, then join
    /// every processor thread (spec §9: clusters tear down in reverse
    /// creation order, each processor joined before the next cluster is
    /// torn down).
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.ready_queue.shutdown();
        let mut processors = self.processors.lock().unwrap();
        for p in processors.drain(..) {
            p.join();
        }
    }

    pub fn processor_count(&self) -> usize {
        self.processors.lock().unwrap().len()
    }
}
