//! `ust_kernel`: a hosted M:N task-and-monitor runtime — virtual processors
//! (real OS threads), cooperative tasks (coroutines backed by parked OS
//! threads), serial instances (monitors with accept-statement external
//! scheduling), the blocking lock family, condition variables with wait
//! morphing, and priority inheritance.
//!
//! Grounded on `r3`'s three-way split between its public vocabulary
//! crate, its low-level utility crate, and the kernel itself: this crate
//! plays the role of `r3_kernel` (the algorithms) fused with the one port
//! this spec targets (`r3_port_std`'s `ums` idiom), since there is exactly
//! one execution environment here rather than an embedded/hosted port
//! matrix to keep separate.
pub mod cluster;
pub mod condlock;
pub mod coroutine;
pub mod current;
pub mod interrupt;
pub mod lock;
pub mod piq;
pub mod processor;
pub mod readyqueue;
pub mod scheduler;
pub mod serial;
pub mod task;
pub mod timeout;

mod boot;

pub use boot::Kernel;
pub use cluster::Cluster;
pub use condlock::{CondLock, WaitableLock};
pub use coroutine::{CancellationType, Coroutine, State as CoroutineState};
pub use current::{cluster as current_cluster, task as current_task, try_task as current_try_task};
pub use lock::{Lock, MutexLock, OwnerLock, Semaphore};
pub use piq::Piq;
pub use processor::Processor;
pub use readyqueue::ReadyQueue;
pub use scheduler::schedule;
pub use serial::{Accept, Serial};
pub use task::{Task, TaskState, TaskWeak};
pub use timeout::{EventList, TimeoutGuard};

pub use ust_core::{
    Config, CoroutineFailure, EntryFailure, IoFailure, KernelFailure, MutexFailure, Priority,
    RendezvousFailure, UnhandledException, WaitingFailure,
};
